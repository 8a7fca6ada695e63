//! Orchestrator entrypoint: load configuration and planner outputs, run
//! the coordinator against the broker, print the final summary.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use rtlforge::config::ForgeConfig;
use rtlforge::design::{DagPlan, DesignContext};
use rtlforge::events::EventEmitter;
use rtlforge::logging::init_structured_logging;
use rtlforge::messaging::AmqpTaskTransport;
use rtlforge::orchestration::Coordinator;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_structured_logging();

    match run().await {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!(error = %e, "orchestrator run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> rtlforge::Result<bool> {
    let config = ForgeConfig::from_env()?;
    info!(
        broker_url = %config.broker_url,
        dag = %config.dag_path.display(),
        "starting orchestrator"
    );

    let design = Arc::new(DesignContext::load(&config.design_context_path)?);
    let plan = DagPlan::load(&config.dag_path)?;

    let transport = Arc::new(AmqpTaskTransport::connect(config.amqp_config()).await?);
    let mut coordinator = Coordinator::new(
        transport,
        config,
        design,
        &plan,
        EventEmitter::new(),
    )?;

    let summary = coordinator.run().await?;
    print!("{}", summary.render());
    Ok(summary.is_success())
}
