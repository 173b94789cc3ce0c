use std::io;
use std::process::ExitCode;

use log::{error, info};

use orgtree::config::Config;
use orgtree::server::Server;
use orgtree::store::FileStore;

// ---------------------------------------------------------------------------
// Main: stdio transport
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    // stdout carries JSON-RPC; env_logger writes to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load();
    let store = match FileStore::open(&config.data_dir) {
        Ok(store) => store,
        Err(e) => {
            error!("cannot open tree store: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!("orgtree-mcp {} ready", env!("CARGO_PKG_VERSION"));

    let mut server = Server::new(store, config);
    match server.serve(io::stdin().lock(), io::stdout()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("stdio transport failed: {e}");
            ExitCode::FAILURE
        }
    }
}
