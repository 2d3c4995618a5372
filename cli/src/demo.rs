//! Demo commands hosted by `courier serve`

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use courier::{CommandContext, CommandHandler, IpcCommand};

#[derive(Debug, Serialize, Deserialize)]
pub struct Ping;

#[derive(Debug, Serialize, Deserialize)]
pub struct Pong {
    pub value: String,
}

impl IpcCommand for Ping {
    type Response = Pong;

    fn command_name() -> Cow<'static, str> {
        Cow::Borrowed("courier.demo.Ping")
    }
}

pub struct PingHandler;

impl CommandHandler<Ping> for PingHandler {
    async fn handle(&self, _command: Ping, context: CommandContext) -> anyhow::Result<Pong> {
        tracing::debug!(message_id = context.message_id(), "ping");
        Ok(Pong { value: "ok".into() })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Echo {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Echoed {
    pub text: String,
    pub target: Option<String>,
}

impl IpcCommand for Echo {
    type Response = Echoed;

    fn command_name() -> Cow<'static, str> {
        Cow::Borrowed("courier.demo.Echo")
    }
}

pub struct EchoHandler;

impl CommandHandler<Echo> for EchoHandler {
    async fn handle(&self, command: Echo, context: CommandContext) -> anyhow::Result<Echoed> {
        if command.text.is_empty() {
            anyhow::bail!("nothing to echo");
        }
        Ok(Echoed {
            text: command.text,
            target: context.target_id().map(str::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use courier::CancellationToken;

    use super::*;

    fn context(target: Option<&str>) -> CommandContext {
        CommandContext::new("m-1".into(), target.map(str::to_owned), CancellationToken::never())
    }

    #[test]
    fn test_ping_answers_ok() {
        let pong = smol::block_on(PingHandler.handle(Ping, context(None))).unwrap();
        assert_eq!(pong.value, "ok");
    }

    #[test]
    fn test_echo_carries_target() {
        let echo = Echo { text: "hi".into() };
        let echoed = smol::block_on(EchoHandler.handle(echo, context(Some("t-1")))).unwrap();
        assert_eq!(echoed.text, "hi");
        assert_eq!(echoed.target.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_empty_echo_fails() {
        let echo = Echo {
            text: String::new(),
        };
        assert!(smol::block_on(EchoHandler.handle(echo, context(None))).is_err());
    }

    #[test]
    fn test_demo_hashes_are_stable() {
        assert_eq!(
            courier::TypeRegistry::new().type_hash::<Ping>().unwrap(),
            courier::compute_type_hash("courier.demo.Ping", None)
        );
    }
}
