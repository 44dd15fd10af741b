use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::fmt;

/// A power limit that was accepted by the rate limiter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerLimitCommand {
    pub target_watts: i32,
    pub issued_at: DateTime<Local>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InverterCommand {
    /// Non-persistent absolute power limit.
    Limit(PowerLimitCommand),
    /// Switch power production on or off.
    Production(bool),
}

impl fmt::Display for InverterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InverterCommand::Limit(cmd) => write!(f, "limit {} W", cmd.target_watts),
            InverterCommand::Production(true) => write!(f, "power ON"),
            InverterCommand::Production(false) => write!(f, "power OFF"),
        }
    }
}

/// Delivers commands to the inverter gateway.
///
/// Delivery is fire-and-forget: an error only reports a transport failure,
/// the control loop never waits for the device to confirm.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, command: &InverterCommand) -> anyhow::Result<()>;
}
