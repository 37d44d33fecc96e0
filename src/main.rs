//! Platform bootstrap CLI

use std::process::ExitCode;

use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use platform_bootstrap::observer::KubeObserver;
use platform_bootstrap::orchestrator::Orchestrator;
use platform_bootstrap::session::parse_args;
use platform_bootstrap::tool::ProcessInvoker;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let session = match parse_args(std::env::args_os()) {
        Ok(session) => session,
        Err(code) => return ExitCode::from(code),
    };

    init_tracing();

    // The kube client picks the process-wide provider; fails only if one is already set
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    debug!(?session, "starting bootstrap");

    let invoker = ProcessInvoker::new();
    let observer = KubeObserver::new(session.kube_context());
    let orchestrator = Orchestrator::new(&session, &invoker, &observer, &observer);

    match orchestrator.run().await {
        Ok(summary) => {
            if !summary.dry_run {
                print!("{}", summary.render());
            }
            ExitCode::from(summary.exit_code())
        }
        Err(e) => {
            error!(error = %e, "bootstrap could not start");
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}
