use std::net::UdpSocket;

use serde_json::json;
use tracing::warn;

use crate::config::Settings;

/// Control addresses understood by the audio engine.
pub mod audio_addr {
    /// Jump to a numbered region in the project.
    pub const REGION: &str = "/region";
    pub const STOP: &str = "/stop";
    pub const PLAY: &str = "/play";
    /// Mute state of track 1, the master playback track.
    pub const TRACK1_MUTE: &str = "/track/1/mute";
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioArg {
    Int(i32),
    Float(f32),
}

/// Which ports a video broadcast is sent to. The info port drives the
/// signage displays, which only care about playlist selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoTarget {
    AllPorts,
    VideoPort,
}

/// One command for the video players, serialized as newline-terminated JSON
/// of the shape `{"command": [name, args...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoCommand {
    command: Vec<serde_json::Value>,
    async_flag: bool,
}

impl VideoCommand {
    /// Selects a playlist entry on every player. Players are configured to
    /// freeze on the first frame until they receive an explicit unpause.
    pub fn playlist_select(index: i32) -> Self {
        Self {
            command: vec![json!("playlist-play-index"), json!(index)],
            async_flag: false,
        }
    }

    /// Releases the first-frame freeze. Property sets always carry the
    /// async flag so the player does not block its command queue.
    pub fn unpause() -> Self {
        Self {
            command: vec![json!("set_property"), json!("pause"), json!("no")],
            async_flag: true,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        if self.async_flag {
            json!({"command": self.command, "async": true})
        } else {
            json!({"command": self.command})
        }
    }

    fn to_wire(&self) -> Vec<u8> {
        let mut bytes = self.to_json().to_string().into_bytes();
        bytes.push(b'\n');
        bytes
    }
}

/// The two one-way senders the engine drives. Both are fire-and-forget:
/// implementations log send failures and never surface them.
pub trait ControlLink: Send + Sync {
    fn send_audio(&self, address: &str, args: &[AudioArg]);
    fn broadcast_video(&self, command: &VideoCommand, target: VideoTarget);
}

/// Real link: OSC over a long-lived UDP socket to the audio engine,
/// JSON over a per-call broadcast socket to the video players.
pub struct UdpLink {
    audio: UdpSocket,
    broadcast_ip: String,
    video_port: u16,
    info_port: u16,
}

impl UdpLink {
    pub fn new(settings: &Settings) -> std::io::Result<Self> {
        let audio = UdpSocket::bind("0.0.0.0:0")?;
        audio.connect((settings.audio_host.as_str(), settings.audio_port))?;
        Ok(Self {
            audio,
            broadcast_ip: settings.broadcast_ip.clone(),
            video_port: settings.video_port,
            info_port: settings.info_port,
        })
    }

    fn broadcast_to(&self, payload: &[u8], port: u16) -> std::io::Result<()> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.set_broadcast(true)?;
        sock.send_to(payload, (self.broadcast_ip.as_str(), port))?;
        Ok(())
    }
}

impl ControlLink for UdpLink {
    fn send_audio(&self, address: &str, args: &[AudioArg]) {
        let packet = encode_osc(address, args);
        if let Err(e) = self.audio.send(&packet) {
            warn!("audio command {address} failed: {e}");
        }
    }

    fn broadcast_video(&self, command: &VideoCommand, target: VideoTarget) {
        let payload = command.to_wire();
        let ports: &[u16] = match target {
            VideoTarget::AllPorts => &[self.video_port, self.info_port],
            VideoTarget::VideoPort => &[self.video_port],
        };
        for port in ports {
            if let Err(e) = self.broadcast_to(&payload, *port) {
                warn!("video broadcast to port {port} failed: {e}");
            }
        }
    }
}

/// OSC 1.0 encoding: zero-terminated address padded to 4 bytes, a `,`-led
/// type-tag string padded the same way, then big-endian argument payloads.
/// The pack has no OSC crate; the message subset here is tiny.
fn encode_osc(address: &str, args: &[AudioArg]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    push_padded(&mut buf, address.as_bytes());

    let mut tags = String::from(",");
    for arg in args {
        tags.push(match arg {
            AudioArg::Int(_) => 'i',
            AudioArg::Float(_) => 'f',
        });
    }
    push_padded(&mut buf, tags.as_bytes());

    for arg in args {
        match arg {
            AudioArg::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
            AudioArg::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
        }
    }
    buf
}

fn push_padded(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes);
    buf.push(0);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Everything a test double saw go out on the wire.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Audio { address: String, args: Vec<AudioArg> },
        Video { payload: serde_json::Value, target: VideoTarget },
    }

    /// ControlLink that records instead of sending.
    #[derive(Default)]
    pub struct RecordingLink {
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    impl RecordingLink {
        pub fn new() -> (Self, Arc<Mutex<Vec<Sent>>>) {
            let link = Self::default();
            let log = link.sent.clone();
            (link, log)
        }
    }

    impl ControlLink for RecordingLink {
        fn send_audio(&self, address: &str, args: &[AudioArg]) {
            self.sent.lock().unwrap().push(Sent::Audio {
                address: address.to_string(),
                args: args.to_vec(),
            });
        }

        fn broadcast_video(&self, command: &VideoCommand, target: VideoTarget) {
            self.sent.lock().unwrap().push(Sent::Video {
                payload: command.to_json(),
                target,
            });
        }
    }
}
