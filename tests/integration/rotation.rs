use crate::*;

use hopper_core::schema::SolveRequest;

/// Two reachable servers are handed out A, B, A.
#[tokio::test]
async fn test_round_robin_resolution() -> Result<()> {
    let a = spawn_compute(StubState::default()).await?;
    let b = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&a.url, &b.url]))?;
    let pool = &ctx.backend.servers;

    let picks = [
        pool.resolve_base_url().await?,
        pool.resolve_base_url().await?,
        pool.resolve_base_url().await?,
    ];
    assert_eq!(picks, [a.url.clone(), b.url.clone(), a.url.clone()]);
    Ok(())
}

/// Uncached solves spread across the rotation.
#[tokio::test]
async fn test_solves_alternate_between_servers() -> Result<()> {
    let a = spawn_compute(StubState::default()).await?;
    let b = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&a.url, &b.url]))?;
    let def = ctx.definition(definition_file()?);

    for _ in 0..4 {
        let mut request = SolveRequest::new(&ctx.backend.settings);
        request.pointer = Some("defA".into());
        let response = def.solve(request, false).await?;
        assert!(response.is_usable(), "{:?}", response.errors);
    }
    assert_eq!(a.solves(), 2);
    assert_eq!(b.solves(), 2);
    Ok(())
}

/// Changing the server list takes effect on the next resolution.
#[tokio::test]
async fn test_settings_change_rebuilds_rotation() -> Result<()> {
    let a = spawn_compute(StubState::default()).await?;
    let b = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&a.url]))?;
    let pool = &ctx.backend.servers;

    assert_eq!(pool.resolve_base_url().await?, a.url);
    pool.settings_changed(vec![b.url.clone()]);
    assert_eq!(pool.resolve_base_url().await?, b.url);
    assert_eq!(pool.resolve_base_url().await?, b.url);
    Ok(())
}
