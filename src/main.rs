use sshmcp::app::App;
use sshmcp::mcp::server::McpServer;
use std::path::PathBuf;
use std::sync::Arc;

fn parse_config_flag() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "-config" || arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            eprintln!("sshmcp: failed to install SIGTERM handler: {}", err);
            std::future::pending::<()>().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[tokio::main]
async fn main() {
    let config_path = parse_config_flag();
    let app = match App::initialize(config_path.as_deref()) {
        Ok(app) => Arc::new(app),
        Err(err) => {
            eprintln!("sshmcp: {}", err);
            std::process::exit(1);
        }
    };

    let server = McpServer::new(app.clone());
    let result = tokio::select! {
        result = server.run_stdio() => result,
        _ = shutdown_signal() => Ok(()),
    };

    app.shutdown().await;

    if let Err(err) = result {
        eprintln!("sshmcp: {}", err);
        std::process::exit(1);
    }
}
