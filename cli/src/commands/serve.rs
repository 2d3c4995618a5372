use courier::{IpcConfig, IpcServer};

use crate::demo::{Echo, EchoHandler, Ping, PingHandler};
use crate::error::CliResult;

pub async fn execute(config: IpcConfig) -> CliResult<()> {
    let server = IpcServer::builder(config)
        .handler::<Ping, _>(|| PingHandler)
        .handler::<Echo, _>(|| EchoHandler)
        .build()?;
    server.start()?;

    for endpoint in server.endpoints() {
        println!("listening on {endpoint}");
    }

    let (tx, rx) = smol::channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;
    let _ = rx.recv().await;

    tracing::info!("shutting down");
    server.shutdown().await;
    Ok(())
}
