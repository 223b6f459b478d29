mod handlers;

use std::net::SocketAddr;

use bytes::Bytes;
use codec::{Header, PacketKind, PacketReader};

use crate::{Service, ServiceHandler, Shared, address::Address};

/// One inbound datagram on its way through a handler.
pub(crate) struct Request<'a, T> {
    pub shared: &'a mut Shared,
    pub name: &'a str,
    pub region: &'a str,
    pub challenge_mode: bool,
    pub handler: &'a T,
    pub source: Address,
    pub header: Header,
    pub reader: PacketReader<'a>,
    pub now: u64,
    pub replies: &'a mut Vec<Bytes>,
}

/// Turns inbound datagrams into outbound ones.
///
/// The router enforces the reception policy: a banned peer is dropped before
/// its payload is even looked at, a malformed or unexpected packet costs the
/// sender reputation tickets, and only well-formed requests reach their
/// handlers.
pub struct Router<T> {
    service: Service<T>,
}

impl<T> Router<T>
where
    T: ServiceHandler,
{
    pub(crate) fn new(service: Service<T>) -> Self {
        Self { service }
    }

    /// Process one datagram. The returned buffers are the replies to send
    /// back to `source`, in order.
    pub fn route(&self, payload: &[u8], source: SocketAddr) -> Vec<Bytes> {
        let inner = self.service.inner();
        let now = inner.clock.now();
        let source = Address::from(source);
        let mut replies = Vec::new();
        let mut shared = inner.shared.lock();

        let outcome = shared.peers.check_peer(&source, true, now);
        if outcome.banned_now {
            inner.handler.on_peer_banned(&source, outcome.total_bans);
        }
        if !outcome.allowed {
            log::trace!("dropped packet from banned peer {source}");
            return replies;
        }

        let mut reader = PacketReader::new(payload);
        let header = match Header::decode(&mut reader) {
            Ok(header) => header,
            Err(err) => {
                log::debug!("bad packet from {source}: {err}");
                punish(&mut shared, &inner.handler, &source, now);
                return replies;
            }
        };

        let kind = header.kind;
        let request = Request {
            shared: &mut *shared,
            name: &inner.name,
            region: &inner.region,
            challenge_mode: inner.challenge_mode,
            handler: &inner.handler,
            source,
            header,
            reader,
            now,
            replies: &mut replies,
        };

        let ok = match kind {
            PacketKind::GameHeartbeat => handlers::heartbeat(request),
            PacketKind::GameMasterInfoResponse => handlers::info_response(request),
            PacketKind::GameTypesRequest => handlers::types_request(request),
            PacketKind::InfoRequest => handlers::info_request(request),
            PacketKind::ListRequest => handlers::list_request(request, false),
            PacketKind::ExtendedListRequest => handlers::list_request(request, true),
            _ => {
                log::debug!("unexpected {kind:?} packet from {source}");
                false
            }
        };

        if !ok {
            punish(&mut shared, &inner.handler, &source, now);
        }

        replies
    }
}

fn punish<T>(shared: &mut Shared, handler: &T, source: &Address, now: u64)
where
    T: ServiceHandler,
{
    if shared.peers.punish_bad_message(source, now) {
        let total_bans = shared
            .peers
            .record(source)
            .map(|record| record.total_bans)
            .unwrap_or(0);
        handler.on_peer_banned(source, total_bans);
    }
}
