use crate::error::{TendError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Signals accepted as `stop_signal`
pub const VALID_STOP_SIGNALS: [&str; 7] = [
    "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
];

pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(TendError::SignalError(format!(
            "Invalid signal name: {}. Must be one of: {}",
            signal_name,
            VALID_STOP_SIGNALS.join(", ")
        ))),
    }
}

/// Deliver a signal to a pid
pub fn send_signal(pid: u32, sig: Signal) -> Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| TendError::SignalError(format!("pid {} out of range", pid)))?;

    signal::kill(Pid::from_raw(raw), sig)
        .map_err(|e| TendError::SignalError(format!("Failed to send {} to {}: {}", sig, pid, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_signals() {
        for name in VALID_STOP_SIGNALS {
            assert!(parse_signal(name).is_ok(), "{} should parse", name);
        }
        assert_eq!(parse_signal("SIGINT").unwrap(), Signal::SIGINT);
    }

    #[test]
    fn test_parse_unknown_signal() {
        assert!(matches!(
            parse_signal("SIGWHATEVER"),
            Err(TendError::SignalError(_))
        ));
        assert!(parse_signal("sigterm").is_err());
    }
}
