use crate::*;

/// An asynchronous batch of 10 never has more than 3 solves at compute.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_batch_is_bounded() -> Result<()> {
    let compute = spawn_compute(StubState {
        delay: Duration::from_millis(40),
        ..StubState::default()
    })
    .await?;
    let mut config = config_for(&[&compute.url]);
    config.solve.set_max_concurrent_requests(3);
    let ctx = SolveContext::from_config(&config)?;
    let def = ctx.definition(definition_file()?);
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, false));

    let iterations: Vec<_> = (0..10).map(|i| x(i, i as f64)).collect();
    let outputs = evaluate(&ctx, &component, &iterations).await?;

    assert_eq!(outputs.len(), 10);
    for (i, out) in outputs.iter().enumerate() {
        assert_eq!(y(out), vec![Value::Number(2.0 * i as f64)]);
    }
    assert_eq!(compute.solves(), 10);
    assert!(compute.peak() <= 3, "peak {}", compute.peak());
    assert!(ctx.queue.stats().peak_in_flight <= 3);
    Ok(())
}

/// A newer evaluation supersedes a background one still in flight.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_new_generation_supersedes_old() -> Result<()> {
    let compute = spawn_compute(StubState {
        delay: Duration::from_millis(200),
        ..StubState::default()
    })
    .await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let def = ctx.definition(definition_file()?);
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, false));

    component.before_solve();
    component.collect_iteration(&x(0, 1.0)).await;
    assert!(matches!(component.start().await, SolveOutcome::Pending));
    let stale_serial = component.serial();

    let outputs = evaluate(&ctx, &component, &[x(0, 7.0)]).await?;

    assert!(component.serial() > stale_serial);
    assert_eq!(y(&outputs[0]), vec![Value::Number(14.0)]);
    Ok(())
}
