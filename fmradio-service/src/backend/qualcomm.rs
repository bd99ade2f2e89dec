//! Backend for Qualcomm FM chips driven through the `fmbin` helper.

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fmradio_protocol::{
    decode_response, encode_command, BackendCommand, BackendEvent, MuteState, ProtocolError,
    SeekDirection,
};

use super::TunerBackend;
use crate::channel::{ChannelError, CommandChannel, LineStream};

/// Buffered events between the reader task and the controller.
const EVENT_QUEUE_SIZE: usize = 64;

/// Tuner backend speaking the line protocol over a command channel.
pub struct QualcommBackend {
    channel: CommandChannel,
    reader: Option<JoinHandle<()>>,
}

impl QualcommBackend {
    /// Take over the channel and start decoding its output.
    ///
    /// The returned receiver yields `None` once the backend output ends.
    pub fn start(
        mut channel: CommandChannel,
    ) -> Result<(Self, mpsc::Receiver<BackendEvent>), ChannelError> {
        let lines = channel.receive()?;
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let reader = tokio::spawn(read_events(lines, event_tx));

        Ok((
            Self {
                channel,
                reader: Some(reader),
            },
            event_rx,
        ))
    }

    async fn send(&mut self, command: BackendCommand) -> Result<(), ChannelError> {
        self.channel.send(&encode_command(&command)).await
    }
}

/// Decode backend output until the stream ends or the controller goes away.
async fn read_events(mut lines: LineStream, events: mpsc::Sender<BackendEvent>) {
    while let Some(line) = lines.next().await {
        let event = match line {
            Ok(line) => {
                trace!("[Qualcomm] << {}", line);
                match decode_response(&line) {
                    Ok(event) => event,
                    Err(ProtocolError::EmptyLine) => continue,
                    Err(e) => {
                        warn!("[Qualcomm] Unparseable output {:?}: {}", line, e);
                        BackendEvent::Error {
                            kind: None,
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                warn!("[Qualcomm] {}", e);
                BackendEvent::Error {
                    kind: None,
                    reason: e.to_string(),
                }
            }
        };
        if events.send(event).await.is_err() {
            debug!("[Qualcomm] Event receiver dropped");
            return;
        }
    }
    info!("[Qualcomm] Backend output closed");
}

#[async_trait]
impl TunerBackend for QualcommBackend {
    fn name(&self) -> &str {
        "qualcomm"
    }

    async fn power_on(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::PowerOn).await
    }

    async fn power_off(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::PowerOff).await
    }

    async fn tune(&mut self, khz: u32) -> Result<(), ChannelError> {
        self.send(BackendCommand::Tune(khz)).await
    }

    async fn seek(&mut self, direction: SeekDirection) -> Result<(), ChannelError> {
        self.send(BackendCommand::Seek(direction)).await
    }

    async fn search(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::Search).await
    }

    async fn set_mute(&mut self, state: MuteState) -> Result<(), ChannelError> {
        self.send(BackendCommand::SetMute(state)).await
    }

    async fn set_stereo(&mut self, enabled: bool) -> Result<(), ChannelError> {
        self.send(BackendCommand::SetStereo(enabled)).await
    }

    async fn get_rssi(&mut self) -> Result<(), ChannelError> {
        self.send(BackendCommand::GetRssi).await
    }

    async fn close(&mut self) {
        if self.channel.is_open() {
            if let Err(e) = self.send(BackendCommand::Exit).await {
                debug!("[Qualcomm] Failed to send exit: {}", e);
            }
        }
        self.channel.close().await;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
