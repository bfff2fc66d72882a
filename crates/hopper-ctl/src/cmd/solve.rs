//! Solve command.

use std::time::Duration;

use anyhow::{Context, Result, bail};

use hopper_core::codec::{Point3, Value};
use hopper_core::config::HopperConfig;
use hopper_core::schema::IoDescription;
use hopper_services::{
    ComponentOptions, ComponentOutputs, MemoryIteration, MessageLevel, SolveComponent,
    SolveOutcome,
};

use super::{open_definition, rule};

struct SolveArgs {
    inputs: Vec<(String, String)>,
    asynchronous: bool,
    no_cache: bool,
}

fn parse_args(rest: &[&str]) -> Result<SolveArgs> {
    let mut args = SolveArgs {
        inputs: Vec::new(),
        asynchronous: false,
        no_cache: false,
    };
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--input" => {
                i += 1;
                let pair = rest.get(i).context("--input requires name=value")?;
                let (name, value) = pair
                    .split_once('=')
                    .with_context(|| format!("--input expects name=value, got {pair}"))?;
                args.inputs.push((name.trim().to_string(), value.trim().to_string()));
            }
            "--async" => args.asynchronous = true,
            "--no-cache" => args.no_cache = true,
            other => bail!("unknown solve option: {other}"),
        }
        i += 1;
    }
    Ok(args)
}

/// Read `raw` as a value of the description's parameter type.
fn parse_value(param_type: &str, raw: &str) -> Result<Value> {
    let xyz = || -> Result<Point3> {
        let parts: Vec<f64> = raw
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("expected x,y,z, got {raw}"))?;
        match parts.as_slice() {
            [x, y, z] => Ok(Point3::new(*x, *y, *z)),
            _ => bail!("expected x,y,z, got {raw}"),
        }
    };

    let value = match param_type.to_ascii_lowercase().as_str() {
        "boolean" => Value::Boolean(raw.parse().with_context(|| format!("not a boolean: {raw}"))?),
        "integer" => Value::Integer(raw.parse().with_context(|| format!("not an integer: {raw}"))?),
        "number" => Value::Number(raw.parse().with_context(|| format!("not a number: {raw}"))?),
        "point" => Value::Point(xyz()?),
        "vector" => Value::Vector(xyz()?),
        _ => Value::Text(raw.to_string()),
    };
    Ok(value)
}

fn build_iteration(io: &IoDescription, inputs: &[(String, String)]) -> Result<MemoryIteration> {
    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for (name, raw) in inputs {
        let Some(param) = io.input(name) else {
            bail!("definition has no input named {name}");
        };
        let value = parse_value(&param.param_type, raw)?;
        match grouped.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => grouped.push((name.clone(), vec![value])),
        }
    }

    let mut iteration = MemoryIteration::new(0);
    for (name, values) in grouped {
        iteration = iteration.with_values(&name, values);
    }
    Ok(iteration)
}

fn print_outputs(outputs: &[ComponentOutputs]) {
    for out in outputs {
        for output in &out.outputs {
            println!("  ┌─ {}", output.name);
            for (path, items) in output.tree.iter() {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                println!("  │  {path} : [{}]", items.join(", "));
            }
            println!("  └─ {} item(s)", output.tree.item_count());
        }
    }
}

pub async fn cmd_solve(config: &HopperConfig, definition: &str, rest: &[&str]) -> Result<()> {
    let args = parse_args(rest)?;
    let (ctx, def) = open_definition(config, definition).await?;
    let io = def
        .describe()
        .await
        .with_context(|| format!("failed to describe {definition}"))?;
    let iteration = build_iteration(&io, &args.inputs)?;

    let mut options = ComponentOptions::from_config(&config.solve);
    options.synchronous = !args.asynchronous;
    if args.no_cache {
        options.cache_in_memory = false;
    }
    let component = SolveComponent::new(ctx.clone(), def.clone(), options);
    let deadline = Duration::from_secs(config.servers.http_timeout_secs.saturating_mul(2));

    // Host evaluation passes; an asynchronous solve needs a second pass once
    // the idle loop reports the batch finished.
    let outputs = loop {
        component.before_solve();
        component.collect_iteration(&iteration).await;
        match component.start().await {
            SolveOutcome::Ready(outputs) => break outputs,
            SolveOutcome::Pending => {
                tracing::info!("solving in the background");
                tokio::time::timeout(deadline, async {
                    loop {
                        ctx.idle.wait().await;
                        ctx.queue.on_idle();
                        if component.take_expired() {
                            break;
                        }
                    }
                })
                .await
                .context("timed out waiting for the background solve")?;
            }
        }
    };

    rule();
    println!("  {}", def.path().unwrap_or_else(|| definition.to_string()));
    rule();
    print_outputs(&outputs);

    let mut failed = false;
    for message in component.messages() {
        match message.level {
            MessageLevel::Error => {
                failed = true;
                println!("  error: {}", message.text);
            }
            MessageLevel::Warning => println!("  warning: {}", message.text),
            MessageLevel::Remark => {}
        }
    }
    if component.take_rebuild_request() {
        println!("  note: the definition changed on compute; its inputs were re-read");
    }
    if failed {
        std::process::exit(1);
    }
    Ok(())
}
