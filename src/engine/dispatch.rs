//! Inbound datagram handling: session matching, sequencing, acknowledgement
//! and the per-command dispatch, including the transfer handshake.

use std::net::SocketAddr;
use std::time::Instant;

use log::{debug, warn};

use crate::engine::engine::{Engine, md5_digest};
use crate::engine::event::{CallRequest, Event, EventKind, UrlKind};
use crate::engine::session::{CallNumber, Session, TransferState};
use crate::engine::timing;
use crate::engine::{samples, seq};
use crate::error::EngineResult;
use crate::jitter::{FrameKind, PutResult};
use crate::transport::Transport;
use crate::wire::command::{self, ControlSubclass, HtmlSubclass, IaxCommand, auth};
use crate::wire::frame::{Datagram, FrameType, FullHeader, MiniHeader, VideoHeader, parse_datagram};
use crate::wire::ies::{IeId, IeList, Ies};

/// What the sequencing pass decided about a full frame.
enum SeqAction {
    /// In order (or exempt from ordering); process it.
    Proceed,
    /// Already seen; acknowledge again and drop.
    DupAck,
    /// A gap opened; demand retransmission and drop.
    Vnak,
    /// A gap we already complained about; drop silently.
    Drop,
}

/// Advance the receive reference clock and hand a media-path event to the
/// session's jitter buffer.
fn queue_delivery(
    s: &mut Session,
    ev: Event,
    kind: FrameKind,
    frame_ms: u32,
    timestamp: u32,
    now: Instant,
) {
    if timestamp > s.last_ts {
        s.last_ts = timestamp;
    }
    let now_ms = timing::rx_elapsed(s, now);
    if s.jb.put(ev, kind, frame_ms, timestamp, now_ms) == PutResult::Dropped {
        debug!("call {}: jitter buffer refused a frame at ts {timestamp}", s.call());
    }
}

impl<T: Transport> Engine<T> {
    /// Classify and handle one received datagram. Malformed input is logged
    /// and dropped; it never fails the poll loop.
    pub(crate) fn incoming(
        &mut self,
        buf: &[u8],
        src: SocketAddr,
        now: Instant,
    ) -> EngineResult<Option<Event>> {
        match parse_datagram(buf) {
            Ok(Datagram::Full(header, payload)) => self.incoming_full(header, payload, src, now),
            Ok(Datagram::Mini(header, payload)) => {
                self.incoming_mini(header, payload, src, now);
                Ok(None)
            }
            Ok(Datagram::Video(header, payload)) => self.incoming_video(header, payload, src, now),
            Err(e) => {
                debug!("dropping malformed datagram from {src}: {e}");
                Ok(None)
            }
        }
    }

    fn incoming_full(
        &mut self,
        h: FullHeader,
        payload: &[u8],
        src: SocketAddr,
        now: Instant,
    ) -> EngineResult<Option<Event>> {
        let cmd = if h.frame_type == FrameType::Iax {
            IaxCommand::from_subclass(h.subclass)
        } else {
            None
        };
        let ies = if h.frame_type == FrameType::Iax {
            match Ies::parse(payload) {
                Ok(ies) => ies,
                Err(e) => {
                    warn!("dropping frame from {src} with a bad element stream: {e}");
                    return Ok(None);
                }
            }
        } else {
            Ies::default()
        };

        let call = match self.registry.match_inbound(src, h.src_call, h.dst_call) {
            Some(call) => call,
            None => match cmd {
                // TXCNT probes may arrive from an address we have never
                // seen; correlate by transfer id instead.
                Some(IaxCommand::TxCnt) => {
                    let Some(id) = ies.transferid else {
                        return Ok(None);
                    };
                    match self.registry.match_txcnt(src, h.src_call, h.dst_call, id) {
                        Some(call) => call,
                        None => return Ok(None),
                    }
                }
                // NEW and POKE legitimately address nobody yet.
                Some(IaxCommand::New) | Some(IaxCommand::Poke) if h.dst_call == 0 => {
                    let jb = self.make_jitter_buffer();
                    let Some(call) = self.registry.create(src, jb) else {
                        warn!("no free call numbers for an inbound call from {src}");
                        return Ok(None);
                    };
                    if let Some(s) = self.registry.get_mut(call) {
                        s.peer_call = h.src_call;
                    }
                    if cmd == Some(IaxCommand::New) {
                        self.sched.insert(
                            now + self.config.first_ping,
                            crate::engine::sched::ItemKind::Timer(
                                crate::engine::sched::Timer::Ping { call },
                            ),
                        );
                    }
                    call
                }
                _ => {
                    debug!(
                        "dropping unmatched full frame from {src} (src_call {}, dst_call {})",
                        h.src_call, h.dst_call
                    );
                    return Ok(None);
                }
            },
        };

        // ACK, INVAL, VNAK and the transfer probes neither consume an
        // inbound sequence slot nor get one of their own acknowledged.
        let exempt = matches!(
            cmd,
            Some(IaxCommand::Ack)
                | Some(IaxCommand::Inval)
                | Some(IaxCommand::Vnak)
                | Some(IaxCommand::TxCnt)
                | Some(IaxCommand::TxAcc)
        );
        // The transfer handshake runs outside the normal sequence flow:
        // probes consume outbound slots the peer never sees acknowledged,
        // so these commands are never dup-acked or VNAK'd.
        let transfer_bypass = matches!(
            cmd,
            Some(IaxCommand::TxReady)
                | Some(IaxCommand::TxRel)
                | Some(IaxCommand::TxCnt)
                | Some(IaxCommand::TxAcc)
        );

        let (ack_range, action) = {
            let Some(s) = self.registry.get_mut(call) else {
                return Ok(None);
            };
            // Genuine frames advance the unwrap reference early; replies
            // that echo old timestamps must not.
            if h.frame_type == FrameType::Iax
                && !matches!(
                    cmd,
                    Some(IaxCommand::Ack) | Some(IaxCommand::Pong) | Some(IaxCommand::LagRp)
                )
                && h.timestamp > s.last_ts
            {
                s.last_ts = h.timestamp;
            }

            // Every frame from the genuine peer acknowledges our frames up
            // to its iseqno; INVAL is hostile and gets no such trust.
            let mut ack_range = None;
            if src == s.peer_addr
                && cmd != Some(IaxCommand::Inval)
                && seq::within_window(s.rseqno, s.oseqno, h.iseqno)
                && s.rseqno != h.iseqno
            {
                ack_range = Some((s.rseqno, h.iseqno));
                s.rseqno = h.iseqno;
            }

            let action = if exempt {
                SeqAction::Proceed
            } else if h.oseqno == s.iseqno {
                s.iseqno = s.iseqno.wrapping_add(1);
                s.last_vnak = None;
                SeqAction::Proceed
            } else if transfer_bypass {
                SeqAction::Proceed
            } else if seq::delta(h.oseqno, s.iseqno) < 128 {
                SeqAction::DupAck
            } else if s.last_vnak.is_some_and(|lv| seq::at_or_before(s.iseqno, lv)) {
                SeqAction::Drop
            } else {
                s.last_vnak = Some(s.iseqno);
                SeqAction::Vnak
            };
            (ack_range, action)
        };

        if let Some((from, to)) = ack_range {
            let span = seq::delta(from, to);
            let mut newly_acked = 0;
            for f in self.sched.frames_mut(call) {
                if !f.acked() && seq::delta(from, f.oseqno) < span {
                    f.neutralize();
                    newly_acked += 1;
                }
            }
            if newly_acked > 0 {
                debug!("call {call}: peer acknowledged {newly_acked} frame(s) up to {to}");
            }
        }

        match action {
            SeqAction::Proceed => {}
            SeqAction::DupAck => {
                debug!(
                    "call {call}: duplicate frame oseqno {} (expected {}), re-acknowledging",
                    h.oseqno,
                    self.registry.get(call).map_or(0, |s| s.iseqno)
                );
                self.send_ack(call, h.timestamp, h.iseqno)?;
                return Ok(None);
            }
            SeqAction::Vnak => {
                warn!("call {call}: out-of-order frame oseqno {}, sending VNAK", h.oseqno);
                let oseq = self.registry.get(call).map_or(0, |s| s.oseqno);
                self.send_command_immediate(
                    call,
                    IaxCommand::Vnak,
                    0,
                    &IeList::new(),
                    oseq,
                )?;
                return Ok(None);
            }
            SeqAction::Drop => return Ok(None),
        }

        let event = match h.frame_type {
            FrameType::Iax => self.handle_iax(call, cmd, &h, &ies, src, now)?,
            _ => self.handle_media(call, &h, payload, now)?,
        };

        // Anything still unacknowledged at the end of dispatch gets an
        // explicit ACK echoing the frame's timestamp.
        if !exempt {
            let needs_ack = self
                .registry
                .get(call)
                .is_some_and(|s| s.aseqno != s.iseqno);
            if needs_ack {
                self.send_ack(call, h.timestamp, h.iseqno)?;
            }
        }
        Ok(event)
    }

    fn send_ack(&mut self, call: CallNumber, ts: u32, oseqno: u8) -> EngineResult<()> {
        self.send_command_immediate(call, IaxCommand::Ack, ts, &IeList::new(), oseqno)
    }

    fn handle_iax(
        &mut self,
        call: CallNumber,
        cmd: Option<IaxCommand>,
        h: &FullHeader,
        ies: &Ies,
        src: SocketAddr,
        now: Instant,
    ) -> EngineResult<Option<Event>> {
        let Some(cmd) = cmd else {
            // Echo the offending subclass so the peer can log it too.
            let mut reply = IeList::new();
            reply.append_byte(IeId::IaxUnknown, h.subclass as u8)?;
            self.send_command(call, IaxCommand::Unsupport, 0, &reply)?;
            return Ok(None);
        };

        match cmd {
            IaxCommand::New => {
                if ies.version.is_some_and(|v| v > command::PROTO_VERSION) {
                    let mut cause = IeList::new();
                    cause.append_str(IeId::Cause, "Unsupported protocol version")?;
                    self.send_command_final(call, IaxCommand::Reject, &cause)?;
                    return Ok(None);
                }
                if let Some(s) = self.registry.get_mut(call) {
                    s.codec_prefs = ies.codec_prefs.clone();
                    if let Some(cap) = ies.capability {
                        s.capability = cap;
                    }
                }
                Ok(Some(Event {
                    call,
                    kind: EventKind::Connect(CallRequest {
                        called_number: ies.called_number.clone(),
                        called_context: ies.called_context.clone(),
                        calling_number: ies.calling_number.clone(),
                        calling_name: ies.calling_name.clone(),
                        username: ies.username.clone(),
                        language: ies.language.clone(),
                        format: ies.format,
                        capability: ies.capability,
                        codec_prefs: ies.codec_prefs.clone(),
                    }),
                }))
            }
            IaxCommand::Accept => {
                let fmt = ies.format.unwrap_or(0);
                let capability = self.registry.get(call).map_or(0, |s| s.capability);
                if fmt == 0 || (capability != 0 && fmt & capability == 0) {
                    warn!("call {call}: peer accepted with unusable format 0x{fmt:x}");
                    let mut cause = IeList::new();
                    cause.append_str(IeId::Cause, "Unable to negotiate codec")?;
                    self.send_command_final(call, IaxCommand::Reject, &cause)?;
                    return Ok(Some(Event {
                        call,
                        kind: EventKind::Reject {
                            cause: Some("Unable to negotiate codec".to_string()),
                        },
                    }));
                }
                if let Some(s) = self.registry.get_mut(call) {
                    s.voice_format_in = fmt;
                }
                Ok(Some(Event {
                    call,
                    kind: EventKind::Accept { format: fmt },
                }))
            }
            IaxCommand::Hangup => Ok(Some(Event {
                call,
                kind: EventKind::Hangup {
                    cause: ies.cause.clone(),
                },
            })),
            IaxCommand::Reject => Ok(Some(Event {
                call,
                kind: EventKind::Reject {
                    cause: ies.cause.clone(),
                },
            })),
            IaxCommand::Inval => Ok(Some(Event {
                call,
                kind: EventKind::Hangup { cause: None },
            })),
            IaxCommand::Ping => Ok(Some(Event {
                call,
                kind: EventKind::Ping {
                    timestamp: h.timestamp,
                },
            })),
            IaxCommand::Poke => Ok(Some(Event {
                call,
                kind: EventKind::Poke {
                    timestamp: h.timestamp,
                },
            })),
            IaxCommand::Pong => {
                let Some(s) = self.registry.get_mut(call) else {
                    return Ok(None);
                };
                let now_ts = s
                    .tx_epoch
                    .map(|e| now.saturating_duration_since(e).as_millis() as u32)
                    .unwrap_or(0);
                let rtt = now_ts.saturating_sub(h.timestamp);
                timing::update_ping_time(s, std::time::Duration::from_millis(u64::from(rtt)));
                let loss = ies.rr_loss.unwrap_or(0);
                let stats = crate::jitter::NetStats {
                    jitter: ies.rr_jitter.unwrap_or(0),
                    loss_pct: loss >> 24,
                    loss_count: loss & 0x00FF_FFFF,
                    packets: ies.rr_pkts.unwrap_or(0),
                    delay: u32::from(ies.rr_delay.unwrap_or(0)),
                    dropped: ies.rr_dropped.unwrap_or(0),
                    out_of_order: ies.rr_ooo.unwrap_or(0),
                };
                s.remote_stats = stats;
                Ok(Some(Event {
                    call,
                    kind: EventKind::Pong { stats },
                }))
            }
            IaxCommand::LagRq => {
                // Rides the jitter buffer so the reply measures real
                // playout delay, not just network flight time.
                if let Some(s) = self.registry.get_mut(call) {
                    let ev = Event {
                        call,
                        kind: EventKind::LagRequest {
                            timestamp: h.timestamp,
                        },
                    };
                    queue_delivery(s, ev, FrameKind::Control, 0, h.timestamp, now);
                }
                Ok(None)
            }
            IaxCommand::LagRp => {
                let delay_ms = self
                    .registry
                    .get(call)
                    .and_then(|s| s.tx_epoch)
                    .map(|e| now.saturating_duration_since(e).as_millis() as u32)
                    .unwrap_or(0)
                    .saturating_sub(h.timestamp);
                Ok(Some(Event {
                    call,
                    kind: EventKind::LagReply { delay_ms },
                }))
            }
            IaxCommand::AuthReq => {
                let methods = ies.auth_methods.unwrap_or(0);
                let (secret, challenge) = {
                    let Some(s) = self.registry.get_mut(call) else {
                        return Ok(None);
                    };
                    s.challenge = ies.challenge.clone();
                    (s.secret.clone(), s.challenge.clone())
                };
                if let (Some(secret), Some(challenge)) = (&secret, &challenge) {
                    if methods & auth::MD5 != 0 {
                        let mut reply = IeList::new();
                        reply.append_str(IeId::Md5Result, &md5_digest(challenge, secret))?;
                        self.send_command(call, IaxCommand::AuthRep, 0, &reply)?;
                        return Ok(None);
                    }
                }
                Ok(Some(Event {
                    call,
                    kind: EventKind::AuthRequest {
                        methods,
                        challenge,
                        username: ies.username.clone(),
                    },
                }))
            }
            IaxCommand::RegAuth => {
                let methods = ies.auth_methods.unwrap_or(0);
                let (username, secret, challenge, refresh) = {
                    let Some(s) = self.registry.get_mut(call) else {
                        return Ok(None);
                    };
                    s.challenge = ies.challenge.clone();
                    (
                        s.username.clone(),
                        s.secret.clone(),
                        s.challenge.clone(),
                        s.refresh,
                    )
                };
                if let (Some(secret), Some(challenge)) = (&secret, &challenge) {
                    if methods & auth::MD5 != 0 {
                        let mut reply = IeList::new();
                        if let Some(username) = &username {
                            reply.append_str(IeId::Username, username)?;
                        }
                        reply.append_str(IeId::Md5Result, &md5_digest(challenge, secret))?;
                        reply.append_short(IeId::Refresh, refresh)?;
                        self.send_command(call, IaxCommand::RegReq, 0, &reply)?;
                        return Ok(None);
                    }
                }
                Ok(Some(Event {
                    call,
                    kind: EventKind::AuthRequest {
                        methods,
                        challenge,
                        username: ies.username.clone(),
                    },
                }))
            }
            IaxCommand::RegAck => Ok(Some(Event {
                call,
                kind: EventKind::RegAck {
                    refresh: ies.refresh,
                    apparent_addr: ies.apparent_addr,
                    msgcount: ies.msgcount,
                },
            })),
            IaxCommand::RegRej => Ok(Some(Event {
                call,
                kind: EventKind::RegRej {
                    cause: ies.cause.clone(),
                },
            })),
            IaxCommand::DpRep => Ok(Some(Event {
                call,
                kind: EventKind::DialplanReply {
                    number: ies.called_number.clone(),
                    status: ies.dpstatus.unwrap_or(0),
                },
            })),
            IaxCommand::Quelch => {
                if let Some(s) = self.registry.get_mut(call) {
                    s.quelched = true;
                }
                Ok(Some(Event {
                    call,
                    kind: EventKind::Quelch {
                        musiconhold: ies.musiconhold,
                    },
                }))
            }
            IaxCommand::Unquelch => {
                if let Some(s) = self.registry.get_mut(call) {
                    s.quelched = false;
                }
                Ok(Some(Event {
                    call,
                    kind: EventKind::Unquelch,
                }))
            }
            IaxCommand::Vnak => {
                debug!("call {call}: peer requests retransmission from {}", h.iseqno);
                self.vnak_retransmit(call, h.iseqno)?;
                Ok(None)
            }
            IaxCommand::TxReq => self.handle_txreq(call, ies),
            IaxCommand::TxCnt => self.handle_txcnt(call, ies, src),
            IaxCommand::TxAcc => self.handle_txacc(call, ies),
            IaxCommand::TxReady => self.handle_txready(call, h, now),
            IaxCommand::TxRel => self.handle_txrel(call, h, ies),
            IaxCommand::TxRej => {
                debug!("call {call}: transfer rejected by peer");
                self.abort_transfer(call)?;
                Ok(Some(Event {
                    call,
                    kind: EventKind::TransferRejected,
                }))
            }
            IaxCommand::Ack => Ok(None),
            IaxCommand::AuthRep
            | IaxCommand::RegReq
            | IaxCommand::RegRel
            | IaxCommand::DpReq
            | IaxCommand::Dial
            | IaxCommand::Transfer
            | IaxCommand::Page
            | IaxCommand::Mwi
            | IaxCommand::Unsupport => {
                // Server-side and informational commands this engine does
                // not act on.
                debug!("call {call}: ignoring {cmd:?}");
                Ok(None)
            }
        }
    }

    // ---- transfer handshake ----------------------------------------------

    /// Endpoint receives TXREQ: remember the candidate path and probe it.
    fn handle_txreq(&mut self, call: CallNumber, ies: &Ies) -> EngineResult<Option<Event>> {
        let Some(addr) = ies.apparent_addr else {
            warn!("call {call}: transfer request without an apparent address");
            return Ok(None);
        };
        let transfer_id = ies.transferid.unwrap_or(0);
        {
            let Some(s) = self.registry.get_mut(call) else {
                return Ok(None);
            };
            s.transfer_addr = Some(SocketAddr::V4(addr));
            s.transfer_call = ies.callno.unwrap_or(0);
            s.transfer_id = transfer_id;
            s.transfer_state = TransferState::Begin;
            // Media on the new path starts with a full frame.
            s.voice_format_out = 0;
            s.video_format_out = 0;
        }
        let mut probe = IeList::new();
        probe.append_int(IeId::TransferId, transfer_id)?;
        self.send_command_transfer(call, IaxCommand::TxCnt, &probe)?;
        Ok(None)
    }

    /// Endpoint receives the other endpoint's TXCNT probe: the candidate
    /// path works inbound; adopt the observed source and confirm.
    fn handle_txcnt(
        &mut self,
        call: CallNumber,
        ies: &Ies,
        src: SocketAddr,
    ) -> EngineResult<Option<Event>> {
        {
            let Some(s) = self.registry.get_mut(call) else {
                return Ok(None);
            };
            if !s.transferring() {
                return Ok(None);
            }
            if ies.transferid.is_some_and(|id| id != s.transfer_id) {
                debug!("call {call}: TXCNT with foreign transfer id, ignored");
                return Ok(None);
            }
            s.transfer_addr = Some(src);
        }
        let mut confirm = IeList::new();
        if let Some(id) = ies.transferid {
            confirm.append_int(IeId::TransferId, id)?;
        }
        self.send_command_transfer(call, IaxCommand::TxAcc, &confirm)?;
        Ok(None)
    }

    /// Endpoint receives TXACC: both directions of the candidate path are
    /// verified. Stop probing and report readiness to the supervisor.
    fn handle_txacc(&mut self, call: CallNumber, ies: &Ies) -> EngineResult<Option<Event>> {
        {
            let Some(s) = self.registry.get_mut(call) else {
                return Ok(None);
            };
            if !s.transferring() {
                return Ok(None);
            }
            if ies.transferid.is_some_and(|id| id != s.transfer_id) {
                return Ok(None);
            }
            s.transfer_state = TransferState::Ready;
        }
        for f in self.sched.frames_mut(call) {
            if f.transfer {
                f.neutralize();
            }
        }
        self.send_command(call, IaxCommand::TxReady, 0, &IeList::new())?;
        Ok(None)
    }

    /// Supervisor receives TXREADY from one endpoint. Once both legs are
    /// ready the call is released to the direct path.
    fn handle_txready(
        &mut self,
        call: CallNumber,
        h: &FullHeader,
        now: Instant,
    ) -> EngineResult<Option<Event>> {
        self.send_ack(call, h.timestamp, h.iseqno)?;
        let sibling = {
            let Some(s) = self.registry.get_mut(call) else {
                return Ok(None);
            };
            if !s.transferring() {
                return Ok(None);
            }
            s.transfer_state = TransferState::Release;
            s.transfer_peer
        };
        let Some(sibling) = sibling else {
            return Ok(None);
        };
        let sibling_ready = self
            .registry
            .get(sibling)
            .is_some_and(|s| s.transfer_state == TransferState::Release);
        if !sibling_ready {
            return Ok(None);
        }

        // Tell each endpoint the other's call number; they complete on
        // their verified candidate paths.
        let peer_a = self.registry.get(call).map_or(0, |s| s.peer_call);
        let peer_b = self.registry.get(sibling).map_or(0, |s| s.peer_call);
        let mut rel_a = IeList::new();
        rel_a.append_short(IeId::CallNo, peer_b)?;
        self.send_command(call, IaxCommand::TxRel, 0, &rel_a)?;
        let mut rel_b = IeList::new();
        rel_b.append_short(IeId::CallNo, peer_a)?;
        self.send_command(sibling, IaxCommand::TxRel, 0, &rel_b)?;

        // Both legs stay matched to their original endpoints so the TXREL
        // exchange can finish; only the transfer bookkeeping is cleared.
        for c in [call, sibling] {
            if let Some(s) = self.registry.get_mut(c) {
                s.transfer_state = TransferState::None;
                s.transfer_addr = None;
                s.transfer_call = 0;
                s.transfer_id = 0;
                s.transfer_peer = None;
                s.transfer_moh = false;
            }
        }
        self.sched.insert(
            now,
            crate::engine::sched::ItemKind::Event(Event {
                call: sibling,
                kind: EventKind::TransferReady,
            }),
        );
        Ok(Some(Event {
            call,
            kind: EventKind::TransferReady,
        }))
    }

    /// Endpoint receives TXREL: the supervisor is out; swing this session
    /// over to the other endpoint.
    fn handle_txrel(
        &mut self,
        call: CallNumber,
        h: &FullHeader,
        ies: &Ies,
    ) -> EngineResult<Option<Event>> {
        // Acknowledge on the old sequence space before it resets.
        self.send_ack(call, h.timestamp, h.iseqno)?;
        let new_peer_call = ies.callno.unwrap_or(0);
        let Some(s) = self.registry.get_mut(call) else {
            return Ok(None);
        };
        if s.transferring() {
            s.complete_transfer(new_peer_call, true, true);
        } else {
            // Released without a handshake on this leg; keep the path and
            // sequence space, only the far call number changes.
            s.complete_transfer(new_peer_call, false, false);
        }
        // Everything still scheduled is addressed to the old path; dump it.
        for f in self.sched.frames_mut(call) {
            f.neutralize();
        }
        Ok(Some(Event {
            call,
            kind: EventKind::Transferred,
        }))
    }

    // ---- non-IAX full frames ---------------------------------------------

    fn handle_media(
        &mut self,
        call: CallNumber,
        h: &FullHeader,
        payload: &[u8],
        now: Instant,
    ) -> EngineResult<Option<Event>> {
        let bypass_video = self.config.video_bypass_jitter;
        let Some(s) = self.registry.get_mut(call) else {
            return Ok(None);
        };
        match h.frame_type {
            FrameType::Voice => {
                s.voice_format_in = h.subclass;
                let frame_ms = samples::sample_count(h.subclass, payload)
                    .map(|n| n / 8)
                    .unwrap_or(0);
                let ev = Event {
                    call,
                    kind: EventKind::Voice {
                        format: h.subclass,
                        timestamp: h.timestamp,
                        data: payload.to_vec(),
                    },
                };
                queue_delivery(s, ev, FrameKind::Voice, frame_ms, h.timestamp, now);
                Ok(None)
            }
            FrameType::Cng => {
                let ev = Event {
                    call,
                    kind: EventKind::Cng {
                        level: h.subclass,
                        data: payload.to_vec(),
                    },
                };
                queue_delivery(s, ev, FrameKind::Silence, 0, h.timestamp, now);
                Ok(None)
            }
            FrameType::Video => {
                s.video_format_in = h.subclass & !1;
                let ev = Event {
                    call,
                    kind: EventKind::Video {
                        format: h.subclass & !1,
                        timestamp: h.timestamp,
                        key_frame: h.subclass & 1 != 0,
                        data: payload.to_vec(),
                    },
                };
                if bypass_video {
                    if h.timestamp > s.last_ts {
                        s.last_ts = h.timestamp;
                    }
                    return Ok(Some(ev));
                }
                queue_delivery(s, ev, FrameKind::Video, 0, h.timestamp, now);
                Ok(None)
            }
            FrameType::Dtmf => Ok(Some(Event {
                call,
                kind: EventKind::Dtmf {
                    digit: h.subclass as u8,
                },
            })),
            FrameType::Control => {
                let ev = match ControlSubclass::from_subclass(h.subclass) {
                    Some(ControlSubclass::Answer) => EventKind::Answer,
                    Some(ControlSubclass::Ring) | Some(ControlSubclass::Ringing) => {
                        EventKind::Ringing
                    }
                    Some(ControlSubclass::Busy) | Some(ControlSubclass::Congestion) => {
                        EventKind::Busy
                    }
                    Some(ControlSubclass::Hangup) => EventKind::Hangup { cause: None },
                    None => {
                        debug!("call {call}: unknown control subclass {}", h.subclass);
                        return Ok(None);
                    }
                };
                queue_delivery(
                    s,
                    Event { call, kind: ev },
                    FrameKind::Control,
                    0,
                    h.timestamp,
                    now,
                );
                Ok(None)
            }
            FrameType::Text => {
                let ev = Event {
                    call,
                    kind: EventKind::Text {
                        text: String::from_utf8_lossy(payload).into_owned(),
                    },
                };
                queue_delivery(s, ev, FrameKind::Control, 0, h.timestamp, now);
                Ok(None)
            }
            FrameType::Image => {
                let ev = Event {
                    call,
                    kind: EventKind::Image {
                        format: h.subclass,
                        data: payload.to_vec(),
                    },
                };
                queue_delivery(s, ev, FrameKind::Control, 0, h.timestamp, now);
                Ok(None)
            }
            FrameType::Html => {
                let kind = match HtmlSubclass::from_subclass(h.subclass) {
                    Some(HtmlSubclass::Url) => EventKind::Url {
                        kind: UrlKind::Display,
                        url: String::from_utf8_lossy(payload).into_owned(),
                    },
                    Some(HtmlSubclass::LinkUrl) => EventKind::Url {
                        kind: UrlKind::Link,
                        url: String::from_utf8_lossy(payload).into_owned(),
                    },
                    Some(HtmlSubclass::LoadComplete) => EventKind::LoadComplete,
                    Some(HtmlSubclass::Unlink) => EventKind::Unlink,
                    Some(HtmlSubclass::LinkReject) => EventKind::LinkReject,
                    Some(sub) => EventKind::Html {
                        kind: sub,
                        data: payload.to_vec(),
                    },
                    None => {
                        debug!("call {call}: unknown html subclass {}", h.subclass);
                        return Ok(None);
                    }
                };
                queue_delivery(
                    s,
                    Event { call, kind },
                    FrameKind::Control,
                    0,
                    h.timestamp,
                    now,
                );
                Ok(None)
            }
            FrameType::Null | FrameType::Iax => Ok(None),
        }
    }

    // ---- mini frames -----------------------------------------------------

    fn incoming_mini(&mut self, h: MiniHeader, payload: &[u8], src: SocketAddr, now: Instant) {
        let Some(call) = self.registry.match_inbound(src, h.src_call, 0) else {
            debug!("dropping unmatched mini frame from {src} (call {})", h.src_call);
            return;
        };
        let Some(s) = self.registry.get_mut(call) else {
            return;
        };
        if s.voice_format_in == 0 {
            warn!("call {call}: mini voice frame before any format was negotiated");
            return;
        }
        let ts = timing::unwrap_timestamp(h.timestamp, s.last_ts);
        let frame_ms = samples::sample_count(s.voice_format_in, payload)
            .map(|n| n / 8)
            .unwrap_or(0);
        let ev = Event {
            call,
            kind: EventKind::Voice {
                format: s.voice_format_in,
                timestamp: ts,
                data: payload.to_vec(),
            },
        };
        queue_delivery(s, ev, FrameKind::Voice, frame_ms, ts, now);
    }

    fn incoming_video(
        &mut self,
        h: VideoHeader,
        payload: &[u8],
        src: SocketAddr,
        now: Instant,
    ) -> EngineResult<Option<Event>> {
        let bypass = self.config.video_bypass_jitter;
        let Some(call) = self.registry.match_inbound(src, h.src_call, 0) else {
            debug!("dropping unmatched video frame from {src} (call {})", h.src_call);
            return Ok(None);
        };
        let Some(s) = self.registry.get_mut(call) else {
            return Ok(None);
        };
        if s.video_format_in == 0 {
            warn!("call {call}: mini video frame before any format was negotiated");
            return Ok(None);
        }
        let ts = timing::unwrap_video_timestamp(h.timestamp, s.last_ts);
        let ev = Event {
            call,
            kind: EventKind::Video {
                format: s.video_format_in,
                timestamp: ts,
                key_frame: h.key_frame,
                data: payload.to_vec(),
            },
        };
        if bypass {
            if ts > s.last_ts {
                s.last_ts = ts;
            }
            return Ok(Some(ev));
        }
        queue_delivery(s, ev, FrameKind::Video, 0, ts, now);
        Ok(None)
    }
}
