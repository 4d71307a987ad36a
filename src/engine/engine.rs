//! The call engine: outbound API and the poll loop.
//!
//! Single-threaded by design. The application drives everything through
//! [`Engine::get_event`]; the engine never spawns threads, never locks, and
//! only touches the wire through the injected [`Transport`].

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::engine::event::{Event, EventKind};
use crate::engine::registry::SessionRegistry;
use crate::engine::sched::{
    self, InFlightFrame, ItemKind, Scheduler, Timer, initial_retry_interval, next_retry_interval,
};
use crate::engine::session::{CallNumber, TransferState, constants as session_constants};
use crate::engine::timing::{self, FrameClass};
use crate::engine::{samples, seq};
use crate::error::{EngineError, EngineResult};
use crate::jitter::{GetResult, JitterBuffer, NetStats};
use crate::transport::Transport;
use crate::wire::command::{self, HtmlSubclass, IaxCommand, format};
use crate::wire::frame::{sizes, FrameType, FullHeader, MiniHeader, VideoHeader};
use crate::wire::ies::{IeId, IeList};

/// Factory producing one jitter buffer per session.
pub type JitterBufferFactory = Box<dyn FnMut() -> Box<dyn JitterBuffer>>;

/// Tunables, replacing what used to be process-wide globals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay before the first keepalive ping of a session.
    pub first_ping: Duration,
    /// Keepalive ping period after the first.
    pub ping_interval: Duration,
    /// Attempts per reliable frame.
    pub max_retries: i32,
    /// Deliver video frames immediately instead of through the jitter
    /// buffer.
    pub video_bypass_jitter: bool,
    /// Codec preference order advertised on outbound calls.
    pub codec_prefs: Vec<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            first_ping: session_constants::FIRST_PING,
            ping_interval: session_constants::PING_INTERVAL,
            max_retries: sched::constants::MAX_RETRIES,
            video_bypass_jitter: false,
            codec_prefs: Vec::new(),
        }
    }
}

/// A parsed `user:pass@host:port/exten@context` destination handle.
/// Everything but the host is optional.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub(crate) username: Option<String>,
    pub(crate) secret: Option<String>,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) exten: Option<String>,
    pub(crate) context: Option<String>,
}

pub(crate) fn parse_endpoint(dest: &str) -> EngineResult<Endpoint> {
    let (peer, exten_part) = match dest.split_once('/') {
        Some((p, e)) => (p, Some(e)),
        None => (dest, None),
    };
    let (cred, hostport) = match peer.rsplit_once('@') {
        Some((c, h)) => (Some(c), h),
        None => (None, peer),
    };
    if hostport.is_empty() {
        return Err(EngineError::BadHandle(dest.to_string()));
    }
    let (username, secret) = match cred {
        Some(c) => match c.split_once(':') {
            Some((u, s)) => (Some(u.to_string()), Some(s.to_string())),
            None => (Some(c.to_string()), None),
        },
        None => (None, None),
    };
    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) => (
            h.to_string(),
            p.parse()
                .map_err(|_| EngineError::BadHandle(dest.to_string()))?,
        ),
        None => (hostport.to_string(), command::DEFAULT_PORT),
    };
    let (exten, context) = match exten_part {
        Some(e) => match e.split_once('@') {
            Some((x, c)) => (Some(x.to_string()), Some(c.to_string())),
            None => (Some(e.to_string()), None),
        },
        None => (None, None),
    };
    Ok(Endpoint {
        username,
        secret,
        host,
        port,
        exten,
        context,
    })
}

fn resolve(host: &str, port: u16) -> EngineResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| EngineError::Resolve(host.to_string()))
}

/// Parameters of one outbound frame handed to the send pipeline.
pub(crate) struct Outbound<'a> {
    pub(crate) frame_type: FrameType,
    pub(crate) subclass: u32,
    /// Explicit timestamp; zero derives one.
    pub(crate) timestamp: u32,
    pub(crate) payload: &'a [u8],
    /// Samples in a voice payload.
    pub(crate) samples: u32,
    /// Send once, never schedule a retry.
    pub(crate) immediate: bool,
    /// Destroy the session once this frame is done.
    pub(crate) is_final: bool,
    /// Send on the transfer path with a zero iseqno.
    pub(crate) transfer: bool,
    /// Reuse a sequence number instead of consuming one (ACK, VNAK).
    pub(crate) seq_override: Option<u8>,
}

impl<'a> Outbound<'a> {
    pub(crate) fn new(frame_type: FrameType, subclass: u32) -> Self {
        Self {
            frame_type,
            subclass,
            timestamp: 0,
            payload: &[],
            samples: 0,
            immediate: false,
            is_final: false,
            transfer: false,
            seq_override: None,
        }
    }

    pub(crate) fn payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    pub(crate) fn timestamp(mut self, ts: u32) -> Self {
        self.timestamp = ts;
        self
    }
}

/// The protocol engine.
///
/// Owns every session, the scheduler and the transport; applications keep
/// only [`CallNumber`] handles.
pub struct Engine<T: Transport> {
    pub(crate) transport: T,
    pub(crate) registry: SessionRegistry,
    pub(crate) sched: Scheduler,
    pub(crate) config: EngineConfig,
    jb_factory: JitterBufferFactory,
    next_transfer_id: u32,
}

impl<T: Transport> Engine<T> {
    /// Create an engine over `transport`. The factory supplies one jitter
    /// buffer per session.
    pub fn new(transport: T, config: EngineConfig, jb_factory: JitterBufferFactory) -> Self {
        Self {
            transport,
            registry: SessionRegistry::new(),
            sched: Scheduler::new(),
            config,
            jb_factory,
            next_transfer_id: rand::Rng::gen_range(&mut rand::thread_rng(), 1..=u32::MAX),
        }
    }

    /// Access the transport, e.g. to learn the bound address.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Create an idle session toward `peer`.
    pub fn new_session(&mut self, peer: SocketAddr) -> EngineResult<CallNumber> {
        let jb = (self.jb_factory)();
        let call = self
            .registry
            .create(peer, jb)
            .ok_or(EngineError::CallNumbersExhausted)?;
        self.sched.insert(
            Instant::now() + self.config.first_ping,
            ItemKind::Timer(Timer::Ping { call }),
        );
        Ok(call)
    }

    /// Tear a session down without telling the peer. Idempotent.
    pub fn destroy(&mut self, call: CallNumber) {
        self.destroy_session(call);
    }

    pub(crate) fn destroy_session(&mut self, call: CallNumber) {
        self.sched.purge_session(call);
        if let Some(mut s) = self.registry.remove(call) {
            s.jb.drain();
            debug!("call {call}: session destroyed");
        }
    }

    /// Peer address of a session.
    pub fn peer_addr(&self, call: CallNumber) -> EngineResult<SocketAddr> {
        Ok(self
            .registry
            .get(call)
            .ok_or(EngineError::UnknownSession(call))?
            .peer_addr())
    }

    /// Local and peer-reported quality counters.
    pub fn netstats(&self, call: CallNumber) -> EngineResult<(NetStats, NetStats)> {
        let s = self
            .registry
            .get(call)
            .ok_or(EngineError::UnknownSession(call))?;
        Ok((s.jb.stats(), s.remote_stats))
    }

    /// Codec preference order the peer advertised, if any.
    pub fn peer_codec_prefs(&self, call: CallNumber) -> EngineResult<Vec<u32>> {
        let s = self
            .registry
            .get(call)
            .ok_or(EngineError::UnknownSession(call))?;
        Ok(s.codec_prefs
            .as_deref()
            .unwrap_or("")
            .chars()
            .filter_map(format::pref_format)
            .collect())
    }

    /// Replaces the codec preference order advertised on outbound calls.
    pub fn set_codec_prefs(&mut self, prefs: &[u32]) {
        self.config.codec_prefs = prefs.to_vec();
    }

    // ---- outbound call control -------------------------------------------

    /// Place a call. `dest` is a `user:pass@host:port/exten@context`
    /// handle; everything but the host is optional.
    pub fn call(
        &mut self,
        dest: &str,
        calling_number: Option<&str>,
        calling_name: Option<&str>,
        fmt: u32,
        capability: u32,
    ) -> EngineResult<CallNumber> {
        let ep = parse_endpoint(dest)?;
        let peer = resolve(&ep.host, ep.port)?;
        let call = self.new_session(peer)?;

        let mut ies = IeList::new();
        ies.append_short(IeId::Version, command::PROTO_VERSION)?;
        if let Some(exten) = &ep.exten {
            ies.append_str(IeId::CalledNumber, exten)?;
        }
        if let Some(context) = &ep.context {
            ies.append_str(IeId::CalledContext, context)?;
        }
        if let Some(user) = &ep.username {
            ies.append_str(IeId::Username, user)?;
        }
        if let Some(number) = calling_number {
            ies.append_str(IeId::CallingNumber, number)?;
        }
        if let Some(name) = calling_name {
            ies.append_str(IeId::CallingName, name)?;
        }
        if !self.config.codec_prefs.is_empty() {
            let prefs: String = self
                .config
                .codec_prefs
                .iter()
                .filter_map(|f| format::pref_char(*f))
                .collect();
            ies.append_str(IeId::CodecPrefs, &prefs)?;
        }
        ies.append_int(IeId::Format, fmt)?;
        ies.append_int(IeId::Capability, capability)?;

        if let Some(s) = self.registry.get_mut(call) {
            s.capability = capability;
            s.username = ep.username.clone();
            s.secret = ep.secret.clone();
        }
        self.send_command(call, IaxCommand::New, 0, &ies)?;
        Ok(call)
    }

    /// Accept an inbound call with the negotiated format.
    pub fn accept(&mut self, call: CallNumber, fmt: u32) -> EngineResult<()> {
        let mut ies = IeList::new();
        ies.append_int(IeId::Format, fmt)?;
        if let Some(s) = self.registry.get_mut(call) {
            s.voice_format_in = fmt;
        }
        self.send_command(call, IaxCommand::Accept, 0, &ies)
    }

    /// Signal answer on an accepted call.
    pub fn answer(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_control(call, command::ControlSubclass::Answer)
    }

    /// Signal ringing to the caller.
    pub fn ring_announce(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_control(call, command::ControlSubclass::Ringing)
    }

    /// Signal busy to the caller.
    pub fn busy(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_control(call, command::ControlSubclass::Busy)
    }

    /// Signal congestion to the caller.
    pub fn congestion(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_control(call, command::ControlSubclass::Congestion)
    }

    /// Hang a call up and destroy the session.
    pub fn hangup(&mut self, call: CallNumber, cause: Option<&str>) -> EngineResult<()> {
        let mut ies = IeList::new();
        if let Some(cause) = cause {
            ies.append_str(IeId::Cause, cause)?;
        }
        self.send_command_final(call, IaxCommand::Hangup, &ies)
    }

    /// Refuse a call and destroy the session.
    pub fn reject(&mut self, call: CallNumber, cause: Option<&str>) -> EngineResult<()> {
        let mut ies = IeList::new();
        if let Some(cause) = cause {
            ies.append_str(IeId::Cause, cause)?;
        }
        self.send_command_final(call, IaxCommand::Reject, &ies)
    }

    /// Dial a number on a session that was accepted without one.
    pub fn dial(&mut self, call: CallNumber, number: &str) -> EngineResult<()> {
        let mut ies = IeList::new();
        ies.append_str(IeId::CalledNumber, number)?;
        self.send_command(call, IaxCommand::Dial, 0, &ies)
    }

    /// Ask the peer's dialplan about a number.
    pub fn dialplan_request(&mut self, call: CallNumber, number: &str) -> EngineResult<()> {
        let mut ies = IeList::new();
        ies.append_str(IeId::CalledNumber, number)?;
        self.send_command(call, IaxCommand::DpReq, 0, &ies)
    }

    /// Answer an authentication demand with a secret.
    pub fn authenticate(&mut self, call: CallNumber, secret: &str) -> EngineResult<()> {
        let challenge = self
            .registry
            .get(call)
            .ok_or(EngineError::UnknownSession(call))?
            .challenge
            .clone();
        let mut ies = IeList::new();
        if let Some(challenge) = challenge {
            ies.append_str(IeId::Md5Result, &md5_digest(&challenge, secret))?;
        }
        self.send_command(call, IaxCommand::AuthRep, 0, &ies)
    }

    /// Register with a peer. `dest` is `user:pass@host:port`; `refresh`
    /// is the requested registration lifetime in seconds.
    pub fn register(&mut self, dest: &str, refresh: u16) -> EngineResult<CallNumber> {
        let ep = parse_endpoint(dest)?;
        let peer = resolve(&ep.host, ep.port)?;
        let call = self.new_session(peer)?;

        if let Some(s) = self.registry.get_mut(call) {
            s.username = ep.username.clone();
            s.secret = ep.secret.clone();
            s.refresh = refresh;
        }
        let mut ies = IeList::new();
        if let Some(user) = &ep.username {
            ies.append_str(IeId::Username, user)?;
        }
        ies.append_short(IeId::Refresh, refresh)?;
        self.send_command(call, IaxCommand::RegReq, 0, &ies)?;
        Ok(call)
    }

    // ---- media and messaging ---------------------------------------------

    /// Send a voice frame. Rides a mini frame whenever the format is
    /// unchanged and the timestamp stays in the current 64 k block.
    /// Silently dropped while the peer has us quelched.
    pub fn send_voice(&mut self, call: CallNumber, fmt: u32, data: &[u8]) -> EngineResult<()> {
        if self
            .registry
            .get(call)
            .ok_or(EngineError::UnknownSession(call))?
            .quelched
        {
            return Ok(());
        }
        let samples = samples::sample_count(fmt, data).unwrap_or(0);
        let mut ob = Outbound::new(FrameType::Voice, fmt).payload(data);
        ob.samples = samples;
        self.send_raw(call, ob)
    }

    /// Send a video frame. Rides a mini frame inside a 32 k timestamp
    /// block when the format is unchanged.
    pub fn send_video(
        &mut self,
        call: CallNumber,
        fmt: u32,
        key_frame: bool,
        data: &[u8],
    ) -> EngineResult<()> {
        let subclass = fmt | u32::from(key_frame);
        self.send_raw(call, Outbound::new(FrameType::Video, subclass).payload(data))
    }

    /// Send comfort noise and mark the talk spurt over, so the next voice
    /// frame reseeds its timestamp instead of following the prediction.
    pub fn send_cng(&mut self, call: CallNumber, level: u32, data: &[u8]) -> EngineResult<()> {
        if let Some(s) = self.registry.get_mut(call) {
            s.not_silent = false;
        }
        self.send_raw(call, Outbound::new(FrameType::Cng, level).payload(data))
    }

    /// Send one DTMF digit.
    pub fn send_dtmf(&mut self, call: CallNumber, digit: char) -> EngineResult<()> {
        self.send_raw(call, Outbound::new(FrameType::Dtmf, digit as u32))
    }

    /// Send a text message.
    pub fn send_text(&mut self, call: CallNumber, text: &str) -> EngineResult<()> {
        self.send_raw(
            call,
            Outbound::new(FrameType::Text, 0).payload(text.as_bytes()),
        )
    }

    /// Send a still image.
    pub fn send_image(&mut self, call: CallNumber, fmt: u32, data: &[u8]) -> EngineResult<()> {
        self.send_raw(call, Outbound::new(FrameType::Image, fmt).payload(data))
    }

    /// Send a URL, clickable when `link`.
    pub fn send_url(&mut self, call: CallNumber, link: bool, url: &str) -> EngineResult<()> {
        let sub = if link {
            HtmlSubclass::LinkUrl
        } else {
            HtmlSubclass::Url
        };
        self.send_raw(
            call,
            Outbound::new(FrameType::Html, sub.as_subclass()).payload(url.as_bytes()),
        )
    }

    /// Report an HTML load as complete.
    pub fn load_complete(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_raw(
            call,
            Outbound::new(FrameType::Html, HtmlSubclass::LoadComplete.as_subclass()),
        )
    }

    /// Tear an HTML link down.
    pub fn send_unlink(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_raw(
            call,
            Outbound::new(FrameType::Html, HtmlSubclass::Unlink.as_subclass()),
        )
    }

    /// Refuse an HTML link.
    pub fn send_link_reject(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_raw(
            call,
            Outbound::new(FrameType::Html, HtmlSubclass::LinkReject.as_subclass()),
        )
    }

    // ---- probes and flow control -----------------------------------------

    /// Send a liveness ping now.
    pub fn ping(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_command(call, IaxCommand::Ping, 0, &IeList::new())
    }

    /// Measure lag through both jitter buffers.
    pub fn lag_request(&mut self, call: CallNumber) -> EngineResult<()> {
        self.send_command(call, IaxCommand::LagRq, 0, &IeList::new())
    }

    /// Ask the peer to stop sending media, optionally requesting hold
    /// music in the meantime.
    pub fn quelch(&mut self, call: CallNumber, musiconhold: bool) -> EngineResult<()> {
        let mut ies = IeList::new();
        if musiconhold {
            ies.append_flag(IeId::MusicOnHold)?;
            if let Some(s) = self.registry.get_mut(call) {
                s.transfer_moh = true;
            }
        }
        self.send_command(call, IaxCommand::Quelch, 0, &ies)
    }

    /// Ask the peer to resume sending media.
    pub fn unquelch(&mut self, call: CallNumber) -> EngineResult<()> {
        if let Some(s) = self.registry.get_mut(call) {
            s.transfer_moh = false;
        }
        self.send_command(call, IaxCommand::Unquelch, 0, &IeList::new())
    }

    /// Request an unattended transfer of the call to `number`.
    pub fn transfer(&mut self, call: CallNumber, number: &str) -> EngineResult<()> {
        let mut ies = IeList::new();
        ies.append_str(IeId::CalledNumber, number)?;
        self.send_command(call, IaxCommand::Transfer, 0, &ies)
    }

    /// Start an attended transfer between two bridged local sessions: each
    /// peer is told the other's address and call number and the engines
    /// verify the direct path before this side releases the call.
    pub fn setup_transfer(&mut self, a: CallNumber, b: CallNumber) -> EngineResult<()> {
        let transfer_id = self.next_transfer_id;
        self.next_transfer_id = self.next_transfer_id.wrapping_add(1).max(1);

        for (x, y) in [(a, b), (b, a)] {
            let (peer_addr, peer_call) = {
                let other = self
                    .registry
                    .get(y)
                    .ok_or(EngineError::UnknownSession(y))?;
                (other.peer_addr, other.peer_call)
            };
            let SocketAddr::V4(peer_v4) = peer_addr else {
                return Err(EngineError::Ipv4Required);
            };
            let mut ies = IeList::new();
            ies.append_addr(IeId::ApparentAddr, peer_v4)?;
            ies.append_short(IeId::CallNo, peer_call)?;
            ies.append_int(IeId::TransferId, transfer_id)?;
            self.send_command(x, IaxCommand::TxReq, 0, &ies)?;

            let s = self
                .registry
                .get_mut(x)
                .ok_or(EngineError::UnknownSession(x))?;
            s.transfer_state = TransferState::Begin;
            s.transfer_id = transfer_id;
            s.transfer_peer = Some(y);
        }
        Ok(())
    }

    // ---- send pipeline ---------------------------------------------------

    pub(crate) fn send_command(
        &mut self,
        call: CallNumber,
        cmd: IaxCommand,
        ts: u32,
        ies: &IeList,
    ) -> EngineResult<()> {
        self.send_raw(
            call,
            Outbound::new(FrameType::Iax, cmd.as_subclass())
                .timestamp(ts)
                .payload(ies.as_bytes()),
        )
    }

    pub(crate) fn send_command_immediate(
        &mut self,
        call: CallNumber,
        cmd: IaxCommand,
        ts: u32,
        ies: &IeList,
        seq_override: u8,
    ) -> EngineResult<()> {
        let mut ob = Outbound::new(FrameType::Iax, cmd.as_subclass())
            .timestamp(ts)
            .payload(ies.as_bytes());
        ob.immediate = true;
        ob.seq_override = Some(seq_override);
        self.send_raw(call, ob)
    }

    pub(crate) fn send_command_final(
        &mut self,
        call: CallNumber,
        cmd: IaxCommand,
        ies: &IeList,
    ) -> EngineResult<()> {
        let mut ob = Outbound::new(FrameType::Iax, cmd.as_subclass()).payload(ies.as_bytes());
        ob.is_final = true;
        self.send_raw(call, ob)?;
        // The frame is on the wire; the session does not outlive it.
        self.destroy_session(call);
        Ok(())
    }

    pub(crate) fn send_command_transfer(
        &mut self,
        call: CallNumber,
        cmd: IaxCommand,
        ies: &IeList,
    ) -> EngineResult<()> {
        let mut ob = Outbound::new(FrameType::Iax, cmd.as_subclass()).payload(ies.as_bytes());
        ob.transfer = true;
        self.send_raw(call, ob)
    }

    fn send_control(
        &mut self,
        call: CallNumber,
        sub: command::ControlSubclass,
    ) -> EngineResult<()> {
        self.send_raw(call, Outbound::new(FrameType::Control, sub.as_subclass()))
    }

    pub(crate) fn send_raw(&mut self, call: CallNumber, ob: Outbound<'_>) -> EngineResult<()> {
        let now = Instant::now();
        let s = self
            .registry
            .get_mut(call)
            .ok_or(EngineError::UnknownSession(call))?;

        let class = match ob.frame_type {
            FrameType::Voice => FrameClass::Voice {
                samples: ob.samples,
            },
            FrameType::Video => FrameClass::Video,
            FrameType::Iax => FrameClass::Genuine,
            _ => FrameClass::Data,
        };
        let prev_sent = s.last_sent;
        let fts = timing::calc_timestamp(s, ob.timestamp, class, now);
        if fts == 0 {
            return Err(EngineError::ZeroTimestamp);
        }

        if !ob.immediate {
            // Mini eligibility: unchanged format, same timestamp block.
            if ob.frame_type == FrameType::Voice
                && ob.subclass == s.voice_format_out
                && (fts & 0xFFFF_0000) == (prev_sent & 0xFFFF_0000)
            {
                let addr = s.peer_addr;
                let mut buf = MiniHeader {
                    src_call: call.as_u16(),
                    timestamp: fts as u16,
                }
                .to_bytes()
                .to_vec();
                buf.extend_from_slice(ob.payload);
                self.transport.send_to(&buf, addr)?;
                return Ok(());
            }
            if ob.frame_type == FrameType::Video
                && (ob.subclass & !1) == s.video_format_out
                && (fts & 0xFFFF_8000) == (prev_sent & 0xFFFF_8000)
            {
                let addr = s.peer_addr;
                let mut buf = VideoHeader {
                    src_call: call.as_u16(),
                    timestamp: (fts & 0x7FFF) as u16,
                    key_frame: ob.subclass & 1 != 0,
                }
                .to_bytes()
                .to_vec();
                buf.extend_from_slice(ob.payload);
                self.transport.send_to(&buf, addr)?;
                return Ok(());
            }
        }

        // Full frame. A new media format sticks for later mini frames.
        if ob.frame_type == FrameType::Voice {
            s.voice_format_out = ob.subclass;
        }
        if ob.frame_type == FrameType::Video {
            s.video_format_out = ob.subclass & !1;
        }
        let oseqno = match ob.seq_override {
            Some(v) => v,
            None => {
                let o = s.oseqno;
                s.oseqno = s.oseqno.wrapping_add(1);
                o
            }
        };
        // Transfer frames carry a zero on the wire, but the session keeps
        // tracking the real inbound sequence it has acknowledged.
        let wire_iseqno = if ob.transfer { 0 } else { s.iseqno };
        s.aseqno = s.iseqno;
        let dst_call = if ob.transfer {
            s.transfer_call
        } else {
            s.peer_call
        };
        let addr = if ob.transfer {
            s.transfer_addr
                .ok_or(EngineError::NoTransferTarget(call))?
        } else {
            s.peer_addr
        };
        let interval = initial_retry_interval(s.ping_time);

        let header = FullHeader {
            src_call: call.as_u16(),
            dst_call,
            retransmitted: false,
            timestamp: fts,
            oseqno,
            iseqno: wire_iseqno,
            frame_type: ob.frame_type,
            subclass: ob.subclass,
        };
        let mut buf = header.to_bytes()?.to_vec();
        buf.extend_from_slice(ob.payload);

        self.transport.send_to(&buf, addr)?;

        let is_ack = ob.frame_type == FrameType::Iax
            && ob.subclass == IaxCommand::Ack.as_subclass();
        if !ob.immediate && !is_ack {
            self.sched.insert(
                now + interval,
                ItemKind::Frame(InFlightFrame {
                    call,
                    oseqno,
                    frame_type: ob.frame_type,
                    subclass: ob.subclass,
                    retries: self.config.max_retries,
                    retry_interval: interval,
                    is_final: ob.is_final,
                    transfer: ob.transfer,
                    data: buf,
                }),
            );
        }
        Ok(())
    }

    pub(crate) fn send_pong(&mut self, call: CallNumber, ts: u32) -> EngineResult<()> {
        let stats = self
            .registry
            .get(call)
            .ok_or(EngineError::UnknownSession(call))?
            .jb
            .stats();
        let mut ies = IeList::new();
        ies.append_int(IeId::RrJitter, stats.jitter)?;
        ies.append_int(
            IeId::RrLoss,
            (stats.loss_pct << 24) | (stats.loss_count & 0x00FF_FFFF),
        )?;
        ies.append_int(IeId::RrPkts, stats.packets)?;
        ies.append_short(IeId::RrDelay, stats.delay as u16)?;
        ies.append_int(IeId::RrDropped, stats.dropped)?;
        ies.append_int(IeId::RrOoo, stats.out_of_order)?;
        self.send_command(call, IaxCommand::Pong, ts, &ies)
    }

    // ---- poll loop -------------------------------------------------------

    /// Drive the engine and fetch the next event.
    ///
    /// Services due retransmissions and timers, polls jitter buffers, then
    /// waits on the transport: indefinitely when `blocking` and nothing is
    /// scheduled, until the next deadline when something is, not at all
    /// otherwise. Returns `None` when nothing application-visible happened.
    pub fn get_event(&mut self, blocking: bool) -> EngineResult<Option<Event>> {
        let now = Instant::now();
        while let Some(kind) = self.sched.pop_due(now) {
            let delivered = match kind {
                ItemKind::Event(ev) => self.deliver(ev)?,
                ItemKind::Frame(frame) => self.service_frame(frame, now)?,
                ItemKind::Timer(Timer::Ping { call }) => {
                    self.service_ping(call, now)?;
                    None
                }
            };
            if delivered.is_some() {
                return Ok(delivered);
            }
        }

        if let Some(ev) = self.poll_jitter(now)? {
            return Ok(Some(ev));
        }

        let timeout = if blocking {
            self.next_event_delay(Instant::now())
        } else {
            Some(Duration::ZERO)
        };
        let mut buf = [0u8; sizes::MAX_DATAGRAM];
        match self.transport.recv_from(&mut buf, timeout)? {
            Some((len, src)) => {
                let datagram = buf[..len].to_vec();
                match self.incoming(&datagram, src, Instant::now())? {
                    Some(ev) => self.deliver(ev),
                    // Dispatch may have parked the event in a jitter
                    // buffer; surface it in this same poll.
                    None => self.poll_jitter(Instant::now()),
                }
            }
            None => Ok(None),
        }
    }

    /// How long until the engine next has work, `None` when fully idle.
    pub fn next_event_delay(&self, now: Instant) -> Option<Duration> {
        let mut next = self.sched.next_wake(now);
        for s in self.registry.iter() {
            if let (Some(now_ms), Some(due_ms)) =
                (timing::rx_elapsed_peek(s, now), s.jb.next_delivery())
            {
                let d = Duration::from_millis(u64::from(due_ms.saturating_sub(now_ms)));
                next = Some(next.map_or(d, |n| n.min(d)));
            }
        }
        next
    }

    /// Post-process an event on its way to the application. Absorbs the
    /// internal probe events and destroys sessions whose story ends here.
    pub(crate) fn deliver(&mut self, ev: Event) -> EngineResult<Option<Event>> {
        if self.registry.get(ev.call).is_none() {
            // Terminal news still matters after the session is gone.
            return Ok(match ev.kind {
                EventKind::Hangup { .. }
                | EventKind::Reject { .. }
                | EventKind::RegRej { .. }
                | EventKind::Timeout
                | EventKind::TransferRejected => Some(ev),
                _ => {
                    debug!("dropping event for dead call {}", ev.call);
                    None
                }
            });
        }
        match ev.kind {
            EventKind::Ping { timestamp } => {
                self.send_pong(ev.call, timestamp)?;
                Ok(None)
            }
            EventKind::Poke { timestamp } => {
                self.send_pong(ev.call, timestamp)?;
                self.destroy_session(ev.call);
                Ok(None)
            }
            EventKind::LagRequest { timestamp } => {
                self.send_command(ev.call, IaxCommand::LagRp, timestamp, &IeList::new())?;
                Ok(None)
            }
            EventKind::Hangup { .. }
            | EventKind::Reject { .. }
            | EventKind::RegAck { .. }
            | EventKind::RegRej { .. } => {
                self.destroy_session(ev.call);
                Ok(Some(ev))
            }
            _ => Ok(Some(ev)),
        }
    }

    fn service_frame(
        &mut self,
        mut frame: InFlightFrame,
        now: Instant,
    ) -> EngineResult<Option<Event>> {
        if frame.acked() {
            if frame.is_final {
                self.destroy_session(frame.call);
            }
            return Ok(None);
        }
        if frame.retries <= 0 {
            warn!(
                "call {}: {:?} subclass {} ran out of retries",
                frame.call, frame.frame_type, frame.subclass
            );
            if frame.transfer {
                // The candidate path never answered; fall back to the call.
                if self.registry.get(frame.call).is_some() {
                    self.send_command(frame.call, IaxCommand::TxRej, 0, &IeList::new())?;
                }
                self.abort_transfer(frame.call)?;
                return Ok(Some(Event {
                    call: frame.call,
                    kind: EventKind::TransferRejected,
                }));
            }
            if frame.is_final {
                self.destroy_session(frame.call);
                return Ok(None);
            }
            return Ok(Some(Event {
                call: frame.call,
                kind: EventKind::Timeout,
            }));
        }

        let Some(s) = self.registry.get(frame.call) else {
            return Ok(None);
        };
        let addr = if frame.transfer {
            match s.transfer_addr {
                Some(a) => a,
                None => return Ok(None),
            }
        } else {
            s.peer_addr
        };
        frame.retries -= 1;
        frame.mark_retransmitted();
        self.transport.send_to(&frame.data, addr)?;
        frame.retry_interval = next_retry_interval(frame.retry_interval, frame.transfer);
        let due = now + frame.retry_interval;
        self.sched.insert(due, ItemKind::Frame(frame));
        Ok(None)
    }

    fn service_ping(&mut self, call: CallNumber, now: Instant) -> EngineResult<()> {
        if self.registry.get(call).is_none() {
            return Ok(());
        }
        self.ping(call)?;
        self.sched.insert(
            now + self.config.ping_interval,
            ItemKind::Timer(Timer::Ping { call }),
        );
        Ok(())
    }

    fn poll_jitter(&mut self, now: Instant) -> EngineResult<Option<Event>> {
        for call in self.registry.calls() {
            loop {
                let result = {
                    let Some(s) = self.registry.get_mut(call) else {
                        break;
                    };
                    if s.rx_epoch.is_none() {
                        break;
                    }
                    let now_ms = timing::rx_elapsed(s, now);
                    let interp_ms = samples::interpolation_ms(s.voice_format_in);
                    s.jb.get(now_ms, interp_ms)
                };
                match result {
                    GetResult::Frame(ev) => {
                        if let Some(ev) = self.deliver(ev)? {
                            return Ok(Some(ev));
                        }
                    }
                    GetResult::Interpolate { timestamp } => {
                        let Some(s) = self.registry.get(call) else {
                            break;
                        };
                        if s.voice_format_in == 0 {
                            break;
                        }
                        return Ok(Some(Event {
                            call,
                            kind: EventKind::Voice {
                                format: s.voice_format_in,
                                timestamp,
                                data: Vec::new(),
                            },
                        }));
                    }
                    GetResult::Drop(ev) => {
                        debug!("call {call}: jitter buffer dropped a late frame: {ev:?}");
                    }
                    GetResult::NoFrame | GetResult::Empty => break,
                }
            }
        }
        Ok(None)
    }

    /// Clear transfer state on a session and its bridged sibling, lifting
    /// hold music where it was engaged.
    pub(crate) fn abort_transfer(&mut self, call: CallNumber) -> EngineResult<()> {
        let (moh, sibling) = {
            let Some(s) = self.registry.get_mut(call) else {
                return Ok(());
            };
            let moh = s.transfer_moh;
            let sibling = s.transfer_peer;
            s.transfer_state = TransferState::None;
            s.transfer_addr = None;
            s.transfer_call = 0;
            s.transfer_id = 0;
            s.transfer_peer = None;
            s.transfer_moh = false;
            (moh, sibling)
        };
        if moh {
            self.unquelch(call)?;
        }
        if let Some(sib) = sibling {
            let moh = {
                match self.registry.get_mut(sib) {
                    Some(s) => {
                        let moh = s.transfer_moh;
                        s.transfer_state = TransferState::None;
                        s.transfer_addr = None;
                        s.transfer_call = 0;
                        s.transfer_id = 0;
                        s.transfer_peer = None;
                        s.transfer_moh = false;
                        moh
                    }
                    None => false,
                }
            };
            if moh {
                self.unquelch(sib)?;
            }
        }
        Ok(())
    }

    /// Resend every scheduled frame at or past the sequence the peer
    /// reported missing, oldest first, without touching backoff state.
    pub(crate) fn vnak_retransmit(&mut self, call: CallNumber, vnak_iseqno: u8) -> EngineResult<()> {
        let (rseqno, peer_addr, transfer_addr) = {
            let s = self
                .registry
                .get(call)
                .ok_or(EngineError::UnknownSession(call))?;
            (s.rseqno, s.peer_addr, s.transfer_addr)
        };
        let mut pending: Vec<(u8, bool, Vec<u8>)> = self
            .sched
            .frames_mut(call)
            .filter(|f| {
                !f.acked() && seq::delta(rseqno, f.oseqno) >= seq::delta(rseqno, vnak_iseqno)
            })
            .map(|f| {
                f.mark_retransmitted();
                (f.oseqno, f.transfer, f.data.clone())
            })
            .collect();
        pending.sort_by_key(|(oseqno, _, _)| seq::delta(rseqno, *oseqno));
        for (_, transfer, data) in pending {
            let addr = if transfer {
                match transfer_addr {
                    Some(a) => a,
                    None => continue,
                }
            } else {
                peer_addr
            };
            self.transport.send_to(&data, addr)?;
        }
        Ok(())
    }

    pub(crate) fn make_jitter_buffer(&mut self) -> Box<dyn JitterBuffer> {
        (self.jb_factory)()
    }
}

pub(crate) fn md5_digest(challenge: &str, secret: &str) -> String {
    format!("{:x}", md5::compute(format!("{challenge}{secret}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_handle() {
        let ep = parse_endpoint("alice:pw@pbx.example.com:4570/600@default").unwrap();
        assert_eq!(ep.username.as_deref(), Some("alice"));
        assert_eq!(ep.secret.as_deref(), Some("pw"));
        assert_eq!(ep.host, "pbx.example.com");
        assert_eq!(ep.port, 4570);
        assert_eq!(ep.exten.as_deref(), Some("600"));
        assert_eq!(ep.context.as_deref(), Some("default"));
    }

    #[test]
    fn test_parse_minimal_handle() {
        let ep = parse_endpoint("192.0.2.1").unwrap();
        assert_eq!(ep.username, None);
        assert_eq!(ep.secret, None);
        assert_eq!(ep.host, "192.0.2.1");
        assert_eq!(ep.port, command::DEFAULT_PORT);
        assert_eq!(ep.exten, None);
    }

    #[test]
    fn test_parse_partial_handles() {
        let ep = parse_endpoint("bob@pbx/100").unwrap();
        assert_eq!(ep.username.as_deref(), Some("bob"));
        assert_eq!(ep.secret, None);
        assert_eq!(ep.host, "pbx");
        assert_eq!(ep.exten.as_deref(), Some("100"));
        assert_eq!(ep.context, None);

        assert!(parse_endpoint("@/").is_err());
        assert!(parse_endpoint("host:notaport").is_err());
    }

    struct RecordingTransport {
        sent: Vec<Vec<u8>>,
    }

    impl Transport for RecordingTransport {
        fn send_to(&mut self, buf: &[u8], _addr: SocketAddr) -> std::io::Result<usize> {
            self.sent.push(buf.to_vec());
            Ok(buf.len())
        }

        fn recv_from(
            &mut self,
            _buf: &mut [u8],
            _timeout: Option<Duration>,
        ) -> std::io::Result<Option<(usize, SocketAddr)>> {
            Ok(None)
        }
    }

    #[test]
    fn test_transfer_send_tracks_acknowledged_sequence() {
        let mut e = Engine::new(
            RecordingTransport { sent: Vec::new() },
            EngineConfig::default(),
            Box::new(|| Box::new(crate::jitter::PassthroughJitterBuffer::new())),
        );
        let call = e.new_session("127.0.0.1:4569".parse().unwrap()).unwrap();
        {
            let s = e.registry.get_mut(call).unwrap();
            s.iseqno = 5;
            s.transfer_state = TransferState::Begin;
            s.transfer_addr = Some("127.0.0.1:4571".parse().unwrap());
            s.transfer_call = 9;
        }
        e.send_command_transfer(call, IaxCommand::TxCnt, &IeList::new())
            .unwrap();

        // The wire header hides the inbound sequence on the new path...
        let datagram = e.transport().sent.last().unwrap();
        assert_eq!(datagram[9], 0);
        // ...while the session keeps tracking what it has acknowledged.
        assert_eq!(e.registry.get(call).unwrap().aseqno, 5);
    }

    #[test]
    fn test_md5_digest_format() {
        let digest = md5_digest("339479842", "s3cr3t");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        // Stable for identical inputs.
        assert_eq!(digest, md5_digest("339479842", "s3cr3t"));
        assert_ne!(digest, md5_digest("339479843", "s3cr3t"));
    }
}
