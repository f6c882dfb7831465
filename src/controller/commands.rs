//! Companion-app command dispatch.
//!
//! Commands arrive sealed (see [`crate::secure`]). The dispatcher only reads
//! the published [`ControllerStatus`] and raises trigger flags, so it can run
//! on whatever task the transport uses, concurrently with the orchestrator.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::state::{ControllerStatus, HISTORY_TEXT_LIMIT};
use super::triggers::{Trigger, Triggers};
use super::ControllerHandle;
use crate::secure::{self, ChannelKeys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    /// `poll_Label`
    PollLabel,
    /// `m_Whiteref`
    RequestWhiteReference,
    /// `m_Darkref`
    RequestBackground,
    /// `b_Calibrated`
    QueryCalibrated,
    /// `i_Sertemp`
    QueryTemperature,
    /// `list_History`
    ListHistory,
}

impl FromStr for RemoteCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "poll_Label" => Ok(RemoteCommand::PollLabel),
            "m_Whiteref" => Ok(RemoteCommand::RequestWhiteReference),
            "m_Darkref" => Ok(RemoteCommand::RequestBackground),
            "b_Calibrated" => Ok(RemoteCommand::QueryCalibrated),
            "i_Sertemp" => Ok(RemoteCommand::QueryTemperature),
            "list_History" => Ok(RemoteCommand::ListHistory),
            other => Err(format!("unknown remote command '{other}'")),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteCommand::PollLabel => "poll_Label",
            RemoteCommand::RequestWhiteReference => "m_Whiteref",
            RemoteCommand::RequestBackground => "m_Darkref",
            RemoteCommand::QueryCalibrated => "b_Calibrated",
            RemoteCommand::QueryTemperature => "i_Sertemp",
            RemoteCommand::ListHistory => "list_History",
        })
    }
}

pub struct CommandDispatcher {
    keys: ChannelKeys,
    triggers: Arc<Triggers>,
    status: watch::Receiver<ControllerStatus>,
}

impl CommandDispatcher {
    pub fn new(keys: ChannelKeys, handle: &ControllerHandle) -> Self {
        Self {
            keys,
            triggers: handle.triggers().clone(),
            status: handle.subscribe(),
        }
    }

    /// Open an envelope and run the command inside it. Returns the sealed
    /// reply for commands that have one.
    pub fn dispatch(&self, envelope: &str) -> Option<String> {
        let plaintext = secure::open(envelope, &self.keys);
        if plaintext.is_empty() {
            return None;
        }
        let command = match plaintext.trim().parse::<RemoteCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}");
                return None;
            }
        };

        let reply = self.execute(command)?;
        match secure::seal(&reply, &self.keys) {
            Ok(sealed) => Some(sealed),
            Err(e) => {
                warn!(%command, error = %e, "could not seal reply");
                None
            }
        }
    }

    /// Line transport: one sealed envelope per input line, one sealed reply
    /// per output line. Returns when the input reaches end of file.
    pub async fn serve_lines<R, W>(&self, input: R, mut output: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let envelope = line.trim();
            if envelope.is_empty() {
                continue;
            }
            if let Some(reply) = self.dispatch(envelope) {
                output.write_all(reply.as_bytes()).await?;
                output.write_all(b"\n").await?;
                output.flush().await?;
            }
        }
        debug!("command input closed");
        Ok(())
    }

    /// Run a decoded command and return the plaintext reply, if any.
    pub fn execute(&self, command: RemoteCommand) -> Option<String> {
        let status = self.status.borrow().clone();
        debug!(%command, "remote command");
        match command {
            RemoteCommand::PollLabel => Some(status.label),
            RemoteCommand::RequestWhiteReference => {
                if !status.white_calibrated {
                    info!("white reference requested remotely");
                    self.triggers.set(Trigger::WhiteReference);
                }
                None
            }
            RemoteCommand::RequestBackground => {
                if !status.background_calibrated {
                    info!("background requested remotely");
                    self.triggers.set(Trigger::Background);
                }
                None
            }
            RemoteCommand::QueryCalibrated => Some(
                if status.calibrated() { "True" } else { "False" }.to_string(),
            ),
            RemoteCommand::QueryTemperature => Some(status.temperature.to_string()),
            RemoteCommand::ListHistory => Some(status.history.to_text(HISTORY_TEXT_LIMIT)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorTemperature;

    fn keys() -> ChannelKeys {
        ChannelKeys::new("sign", "0123456789abcdef0123456789abcdef").unwrap()
    }

    fn setup() -> (CommandDispatcher, ControllerHandle, watch::Sender<ControllerStatus>) {
        let (tx, rx) = watch::channel(ControllerStatus::default());
        let handle = ControllerHandle::new(Arc::new(Triggers::new()), rx);
        (CommandDispatcher::new(keys(), &handle), handle, tx)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("poll_Label".parse::<RemoteCommand>(), Ok(RemoteCommand::PollLabel));
        assert_eq!(
            "m_Darkref".parse::<RemoteCommand>(),
            Ok(RemoteCommand::RequestBackground)
        );
        assert!("poll_label".parse::<RemoteCommand>().is_err());
    }

    #[test]
    fn test_poll_label_round_trip() {
        let (dispatcher, _handle, _tx) = setup();
        let request = secure::seal("poll_Label", &keys()).unwrap();
        let reply = dispatcher.dispatch(&request).unwrap();
        assert_eq!(secure::open(&reply, &keys()), "No measurements");
    }

    #[test]
    fn test_calibration_request_sets_flag_once() {
        let (dispatcher, handle, tx) = setup();
        assert_eq!(dispatcher.execute(RemoteCommand::RequestWhiteReference), None);
        assert!(handle.triggers().is_set(Trigger::WhiteReference));

        handle.triggers().clear_all();
        tx.send_modify(|s| s.white_calibrated = true);
        dispatcher.execute(RemoteCommand::RequestWhiteReference);
        assert!(!handle.triggers().is_set(Trigger::WhiteReference));
    }

    #[test]
    fn test_calibrated_and_temperature_replies() {
        let (dispatcher, _handle, tx) = setup();
        assert_eq!(dispatcher.execute(RemoteCommand::QueryCalibrated).as_deref(), Some("False"));
        assert_eq!(dispatcher.execute(RemoteCommand::QueryTemperature).as_deref(), Some("0"));

        tx.send_modify(|s| {
            s.white_calibrated = true;
            s.background_calibrated = true;
            s.temperature = SensorTemperature::Unavailable;
        });
        assert_eq!(dispatcher.execute(RemoteCommand::QueryCalibrated).as_deref(), Some("True"));
        assert_eq!(dispatcher.execute(RemoteCommand::QueryTemperature).as_deref(), Some("err"));
    }

    #[tokio::test]
    async fn test_serve_lines_answers_each_envelope_on_its_own_line() {
        let (dispatcher, handle, tx) = setup();
        tx.send_modify(|s| s.label = "Wool: 100.0%\n".to_string());

        let input = format!(
            "{}\n\n{}\n{}\n",
            secure::seal("poll_Label", &keys()).unwrap(),
            secure::seal("m_Darkref", &keys()).unwrap(),
            secure::seal("b_Calibrated", &keys()).unwrap(),
        );
        let mut output = Vec::new();
        dispatcher
            .serve_lines(input.as_bytes(), &mut output)
            .await
            .unwrap();

        let replies: Vec<String> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| secure::open(line, &keys()))
            .collect();
        assert_eq!(replies, vec!["Wool: 100.0%\n".to_string(), "False".to_string()]);
        assert!(handle.triggers().is_set(Trigger::Background));
    }

    #[tokio::test]
    async fn test_serve_lines_stops_at_end_of_input() {
        let (dispatcher, _handle, _tx) = setup();
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let bridge = tokio::spawn(async move {
            dispatcher
                .serve_lines(tokio::io::BufReader::new(server_read), server_write)
                .await
        });

        let request = secure::seal("poll_Label", &keys()).unwrap();
        client_write.write_all(request.as_bytes()).await.unwrap();
        client_write.write_all(b"\n").await.unwrap();
        let mut reply = tokio::io::BufReader::new(&mut client_read).lines();
        let line = reply.next_line().await.unwrap().unwrap();
        assert_eq!(secure::open(&line, &keys()), "No measurements");

        client_write.shutdown().await.unwrap();
        drop(client_write);
        bridge.await.unwrap().unwrap();
    }

    #[test]
    fn test_bad_envelopes_and_unknown_commands_are_ignored() {
        let (dispatcher, handle, _tx) = setup();
        assert_eq!(dispatcher.dispatch("{}"), None);

        let unknown = secure::seal("format_Disk", &keys()).unwrap();
        assert_eq!(dispatcher.dispatch(&unknown), None);

        let foreign = ChannelKeys::new("other", "0123456789abcdef0123456789abcdef").unwrap();
        let forged = secure::seal("m_Whiteref", &foreign).unwrap();
        assert_eq!(dispatcher.dispatch(&forged), None);
        assert!(!handle.triggers().is_set(Trigger::WhiteReference));
    }
}
