use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use spindle_core::ports::SystemClock;
use spindle_core::schedule::maybe_start;
use spindle_core::{Engine, EngineBuilder, SpindleConfig, TaskHandle, TaskStatus};

mod cli;
mod periodic;
mod services;
mod tasks;

use cli::{Cli, Demo};
use services::{Contact, Directory, StubMailer, StubPush, StubRenderer};
use tasks::{GeneratePdfReport, SendEmail, SendNotification, Services};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn setup_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn demo_services(retry_base: Duration) -> Services {
    Services {
        mailer: Arc::new(StubMailer::new(2)),
        push: Arc::new(StubPush),
        renderer: Arc::new(StubRenderer),
        directory: Directory::default().with(
            "u-100",
            Contact {
                email: Some("ana.quispe@example.com".to_string()),
                push_token: Some("fcm-7f3a9c2e41d0b".to_string()),
            },
        ),
        backoff_base: retry_base,
    }
}

/// Submit the selected demo tasks. Returns their handles.
async fn run_demos(engine: &Engine, demo: Demo) -> Result<Vec<TaskHandle>> {
    let mut handles = Vec::new();

    if demo.includes(Demo::Email) {
        let task = engine.task::<SendEmail>().ok_or_else(|| eyre::eyre!("email task not registered"))?;
        let handle = task
            .submit(SendEmail {
                to_email: "ana.quispe@example.com".to_string(),
                subject: "Resumen semanal".to_string(),
                html_content: "<p>Gastaste S/ 420 esta semana</p>".to_string(),
                text_content: None,
            })
            .await?;
        info!(task_id = %handle.id(), "submitted email demo");
        handles.push(handle);
    }

    if demo.includes(Demo::Notify) {
        let task = engine
            .task::<SendNotification>()
            .ok_or_else(|| eyre::eyre!("notification task not registered"))?;
        let handle = task
            .submit(SendNotification {
                user_id: "u-100".to_string(),
                title: "Alerta de presupuesto".to_string(),
                message: "Llegaste al 80% de tu presupuesto de comida".to_string(),
                notification_type: "threshold_alert".to_string(),
                data: Some(json!({ "budget_id": "b-7" })),
                channels: None,
            })
            .await?;
        info!(task_id = %handle.id(), "submitted notification demo");
        handles.push(handle);
    }

    if demo.includes(Demo::Report) {
        let task = engine
            .task::<GeneratePdfReport>()
            .ok_or_else(|| eyre::eyre!("report task not registered"))?;
        let handle = task
            .submit(GeneratePdfReport {
                user_id: "u-100".to_string(),
                report_type: "monthly".to_string(),
                start_date_str: "2026-09-01".to_string(),
                end_date_str: "2026-09-30".to_string(),
                send_email: true,
                user_email: Some("ana.quispe@example.com".to_string()),
            })
            .await?;
        info!(task_id = %handle.id(), "submitted report demo");
        handles.push(handle);
    }

    if demo.includes(Demo::Cancel) {
        let handle = engine
            .submit_by_name(tasks::CHECK_ALL_BUDGETS, json!({}))
            .await?;
        let cancelled = handle.cancel().await;
        info!(task_id = %handle.id(), cancelled, "submitted and cancelled budget check");
        handles.push(handle);
    }

    Ok(handles)
}

async fn report(engine: &Engine, handles: &[TaskHandle], timeout: Duration) -> Result<()> {
    for handle in handles {
        match tokio::time::timeout(timeout, handle.wait(POLL_INTERVAL)).await {
            Ok(state) => info!(task_id = %handle.id(), %state, "task settled"),
            Err(_) => warn!(task_id = %handle.id(), "gave up waiting for task"),
        }
        let status: TaskStatus = handle.status().await;
        println!("{}", serde_json::to_string_pretty(&status)?);
    }

    // follow-ups submitted from task bodies
    let deadline = tokio::time::Instant::now() + timeout;
    while engine.counts().await.in_flight() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    println!("{}", serde_json::to_string_pretty(&engine.counts().await)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = SpindleConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if cli.scheduler {
        config.scheduler.enabled = true;
    }

    let services = demo_services(Duration::from_millis(cli.retry_base_ms));
    let engine = tasks::register_all(EngineBuilder::new(), services)?
        .config(config.engine.clone())
        .expect_tasks(&tasks::ALL_TASKS)
        .build()
        .context("Failed to start engine")?;
    let scheduler = maybe_start(
        engine.clone(),
        &config.scheduler,
        SystemClock,
        periodic::finance_jobs()?,
    )?;

    let handles = run_demos(&engine, cli.demo).await?;
    report(&engine, &handles, Duration::from_secs(cli.timeout_secs)).await?;

    if let Some(scheduler) = scheduler {
        info!("Scheduler running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        scheduler.shutdown().await;
    }

    engine.shutdown().await;
    Ok(())
}
