use crate::cli::ServeOptions;
use crate::net::peer::TcpPeerSender;
use crate::net::server::serve;
use crate::worker::Worker;
use anyhow::Result;
use geocube_common::cache::Db;
use geocube_common::settings::Settings;
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
pub async fn run(serve_options: ServeOptions) -> Result<()> {
    let settings = Settings::load_from_data_folder(&serve_options.path)?;
    debug!("loaded settings: {:?}", &settings);

    let tree = settings.tree.build()?;
    let mut db = Db::new(settings.cache);
    db.hydrate_from_disk()?;

    // No peer addresses are configured yet: this worker resolves every
    // cube locally. Wiring a real `cube_id -> worker_id -> address` map
    // in here is how a multi-worker deployment would extend this.
    let peer_sender = Arc::new(TcpPeerSender::new(HashMap::new(), tokio::runtime::Handle::current()));
    let worker = Worker::new(serve_options.worker_id, db).with_peer_sender(peer_sender);
    worker.install_tree(tree);
    let worker = Arc::new(worker);

    let (shutdown_sender, shutdown_receiver) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.unwrap();
            shutdown_sender.send(()).unwrap();
        }
    });

    debug!("starting server...");
    serve((serve_options.host, serve_options.port), worker, shutdown_receiver).await?;
    Ok(())
}
