use courier::{IpcClient, IpcConfig};

use crate::cli::EchoArgs;
use crate::demo::Echo;
use crate::error::CliResult;

pub async fn execute(args: EchoArgs, config: IpcConfig) -> CliResult<()> {
    let client = IpcClient::new(config)?;
    let command = Echo { text: args.text };

    let echoed = match args.target {
        Some(target) => client.request_to(&command, target, None).await?,
        None => client.request(&command, None).await?,
    };

    match echoed.target {
        Some(target) => println!("{} (target {target})", echoed.text),
        None => println!("{}", echoed.text),
    }
    Ok(())
}
