use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;
use workflow_pipeline::cli::commands::{parse_value, RunCommand, StagesCommand, ValidateCommand};
use workflow_pipeline::cli::output::*;
use workflow_pipeline::cli::{Cli, Command};
use workflow_pipeline::core::{config::WorkflowConfig, WorkflowContext, WorkflowEvent};
use workflow_pipeline::service::WorkflowTemplate;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Stages(cmd) => show_stages(cmd)?,
    }

    Ok(())
}

async fn run_workflow(cmd: &RunCommand) -> Result<()> {
    let config = WorkflowConfig::from_file(&cmd.file).context("Failed to load workflow config")?;

    println!("{} Loaded workflow: {}", INFO, style(&config.title).bold());

    let context = WorkflowContext::from_data(config.context_variables()?);
    for (key, value) in &cmd.var {
        context.set(key, parse_value(value));
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let template = WorkflowTemplate::from_config(&config)?;
    let pipeline = template.build(&config.title, &config.description)?;
    debug!("Built workflow {}", pipeline.id());

    // Ctrl-C cancels at the next stage boundary
    let canceller = pipeline.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(e) = canceller.cancel("interrupted").await {
                debug!("Ignoring interrupt: {}", e);
            }
        }
    });

    let progress = create_progress_bar();
    let mut events = pipeline.subscribe();
    let bar = progress.clone();
    let observed = pipeline.clone();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    if let WorkflowEvent::Progress { overall, .. } = &envelope.event {
                        bar.set_position(u64::from(*overall));
                    } else if matches!(
                        envelope.event,
                        WorkflowEvent::StageProgress { .. } | WorkflowEvent::StepProgress { .. }
                    ) {
                        let overall = u64::from(observed.overall_progress().await);
                        bar.set_position(overall.max(bar.position()));
                    } else if let Some(line) = format_event(&envelope.event) {
                        bar.println(line);
                    }
                    if let WorkflowEvent::StageStarted { name, .. } = &envelope.event {
                        bar.set_message(name.clone());
                    }
                    if matches!(
                        envelope.event,
                        WorkflowEvent::WorkflowCompleted { .. } | WorkflowEvent::WorkflowError { .. }
                    ) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!("Output skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let input = cmd.input_value();
    let result = pipeline.execute(input, context).await;

    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        debug!("Event printer did not drain in time");
    }
    progress.finish_and_clear();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for (stage_id, output) in &result.results {
            let text = match output {
                serde_json::Value::String(s) => s.clone(),
                other => serde_json::to_string_pretty(other)?,
            };
            if !text.is_empty() {
                println!("\n{} Output from {}:\n{}", INFO, style(stage_id).dim(), format_output(&text, 10));
            }
        }
    }

    let duration = format_duration(Duration::from_millis(result.duration_ms));
    if result.success {
        println!(
            "\n{} {} completed {} in {}",
            CHECK,
            style(pipeline.title()).bold(),
            style("successfully").green(),
            duration
        );
        return Ok(());
    }

    println!(
        "\n{} {} {} ({})",
        CROSS,
        style(pipeline.title()).bold(),
        format_state(pipeline.state().await),
        duration
    );
    if let Some(stage) = &result.failed_stage {
        println!("  Failed stage: {}", style(stage).red());
    }
    println!("\n{}", style("Recent log:").bold());
    for entry in pipeline.logs(config.engine.log_tail).await {
        println!("  {}", format_log_entry(&entry));
    }
    error!("{}", result.error.as_deref().unwrap_or("workflow failed"));
    std::process::exit(1);
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating workflow...", INFO);

    match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Workflow configuration is valid!", CHECK);
            println!("  Title: {}", style(&config.title).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Gates: {}", style(config.gates.len()).cyan());
            println!("  Checks: {}", style(config.checks.len()).cyan());
            println!("  Variables: {}", style(config.variables.len()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn show_stages(cmd: &StagesCommand) -> Result<()> {
    let (title, template) = match &cmd.file {
        Some(file) => {
            let config = WorkflowConfig::from_file(file).context("Failed to load workflow config")?;
            (config.title.clone(), WorkflowTemplate::from_config(&config)?)
        }
        None => ("Default workflow".to_string(), WorkflowTemplate::default_stage_set()),
    };

    if cmd.json {
        let data = serde_json::json!({
            "title": title,
            "stages": template.stages().iter().map(|s| s.info()).collect::<Vec<_>>(),
            "gates": template.gates(),
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} {}", INFO, style(&title).bold());
    let shares = weight_shares(template.stages());
    for (index, (stage, share)) in template.stages().iter().zip(shares).enumerate() {
        let gate = template.gates().iter().find(|g| match &stage.gate_id {
            Some(id) => &g.id == id,
            None => g.stage_id == stage.id,
        });
        println!("{}", format_stage_line(index, stage, share, gate));
    }

    Ok(())
}
