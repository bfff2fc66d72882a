use crate::*;

/// Two identical iterations in one batch cost one compute call and both
/// read y = 10.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_units_share_one_solve() -> Result<()> {
    let compute = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let def = ctx.definition(definition_file()?);
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, true));

    let outputs = evaluate(&ctx, &component, &[x(0, 5.0), x(1, 5.0)]).await?;

    assert_eq!(outputs.len(), 2);
    for out in &outputs {
        assert_eq!(y(out), vec![Value::Number(10.0)]);
    }
    assert_eq!(compute.solves(), 1);
    assert!(component.messages().is_empty());
    Ok(())
}

/// A second evaluation with the same inputs is served from memory.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_repeat_evaluation_hits_cache() -> Result<()> {
    let compute = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let def = ctx.definition(definition_file()?);
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, true));

    evaluate(&ctx, &component, &[x(0, 3.0)]).await?;
    let outputs = evaluate(&ctx, &component, &[x(0, 3.0)]).await?;

    assert_eq!(y(&outputs[0]), vec![Value::Number(6.0)]);
    assert_eq!(compute.solves(), 1);
    assert_eq!(ctx.backend.cache.len(), 1);

    ctx.backend.cache.clear();
    evaluate(&ctx, &component, &[x(0, 3.0)]).await?;
    assert_eq!(compute.solves(), 2);
    Ok(())
}

/// Asynchronous evaluation returns through the idle loop.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_evaluation_via_idle_loop() -> Result<()> {
    let compute = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let def = ctx.definition(definition_file()?);
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, false));

    let outputs = evaluate(&ctx, &component, &[x(0, 1.0), x(1, 2.0), x(2, 3.0)]).await?;

    let ys: Vec<Vec<Value>> = outputs.iter().map(y).collect();
    assert_eq!(
        ys,
        vec![
            vec![Value::Number(2.0)],
            vec![Value::Number(4.0)],
            vec![Value::Number(6.0)],
        ]
    );
    // Each iteration lands on its own branch.
    let branch = outputs[2].output("y").unwrap().tree.paths().last().cloned().unwrap();
    assert_eq!(branch.to_string(), "{2}");
    Ok(())
}

/// The description comes from compute and is fetched once.
#[tokio::test]
async fn test_description_round_trip() -> Result<()> {
    let compute = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let def = ctx.definition(definition_file()?);

    let io = def.describe().await?;
    def.describe().await?;

    assert_eq!(io.inputs[0].display_name(), "x");
    assert_eq!(io.outputs[0].display_name(), "y");
    assert_eq!(def.cache_key().as_deref(), Some("md5_DOUBLE"));
    assert_eq!(compute.state.io_calls.load(Ordering::SeqCst), 1);
    assert!(def.http_record().io_response.is_some());
    Ok(())
}
