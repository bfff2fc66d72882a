use crate::*;

use hopper_core::schema::SolveRequest;
use hopper_services::MessageLevel;

fn errors(component: &SolveComponent) -> Vec<String> {
    component
        .messages()
        .into_iter()
        .filter(|m| m.level == MessageLevel::Error)
        .map(|m| m.text)
        .collect()
}

/// 408 from compute is a terminal timeout for that iteration only.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_request_timeout_is_per_iteration() -> Result<()> {
    let compute = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let path = definition_file()?;
    let def = ctx.definition(path.clone());
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, true));

    let outputs = evaluate(&ctx, &component, &[x(0, 408.0), x(1, 2.0)]).await?;

    assert_eq!(outputs[0].errors, vec![format!("Request timeout: {path}")]);
    assert_eq!(y(&outputs[1]), vec![Value::Number(4.0)]);
    assert_eq!(errors(&component), vec![format!("Request timeout: {path}")]);
    // Timeouts are not cached; the good iteration is.
    assert_eq!(ctx.backend.cache.len(), 1);
    Ok(())
}

/// A server that does not know the definition gets it inline on retry.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_definition_retries_inline() -> Result<()> {
    let compute = spawn_compute(StubState {
        require_inline: true,
        ..StubState::default()
    })
    .await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let def = ctx.definition(definition_file()?);
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, true));

    let outputs = evaluate(&ctx, &component, &[x(0, 4.0)]).await?;

    assert_eq!(y(&outputs[0]), vec![Value::Number(8.0)]);
    assert_eq!(compute.solves(), 2);
    assert_eq!(compute.state.inline_solves.load(Ordering::SeqCst), 1);
    assert!(ctx.backend.cache.is_empty());
    Ok(())
}

/// "Bad inputs" refreshes the description and asks for a rebuild without
/// failing the host.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bad_inputs_requests_rebuild() -> Result<()> {
    let compute = spawn_compute(StubState::default()).await?;
    let ctx = SolveContext::from_config(&config_for(&[&compute.url]))?;
    let def = ctx.definition(format!("{}/defs/double.gh", compute.url));
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, true));

    let outputs = evaluate(&ctx, &component, &[x(0, -1.0)]).await?;

    assert_eq!(outputs[0].errors, vec!["Bad inputs"]);
    assert!(component.take_rebuild_request());
    assert_eq!(compute.state.io_calls.load(Ordering::SeqCst), 2);
    assert!(ctx.backend.cache.is_empty());
    Ok(())
}

/// A dead server is a response error, not a crash.
#[tokio::test]
async fn test_unreachable_server_reports_error() -> Result<()> {
    let ctx = SolveContext::from_config(&config_for(&["http://127.0.0.1:1"]))?;
    let def = ctx.definition(definition_file()?);
    let component = SolveComponent::new(ctx.clone(), def, options(&ctx, true));

    evaluate(&ctx, &component, &[x(0, 1.0)]).await?;

    let errors = errors(&component);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("127.0.0.1:1"), "{errors:?}");
    Ok(())
}

/// With no server to be had the solve fails with a resolver error.
#[tokio::test]
async fn test_no_server_available() -> Result<()> {
    let ctx = SolveContext::from_config(&config_for(&[]))?;
    let def = ctx.definition(definition_file()?);

    let mut request = SolveRequest::new(&ctx.backend.settings);
    request.pointer = Some("defA".into());
    let err = def.solve(request, true).await.unwrap_err();
    assert!(err.to_string().starts_with("No compute server found"));
    Ok(())
}
