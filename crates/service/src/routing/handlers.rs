use bytes::Bytes;
use codec::{
    FRESH_QUERY_INDEX, Header, MAX_BODY, MAX_PACKET, PacketKind, PacketWriter, is_printable,
    kinds::flags,
};

use crate::{
    ServiceHandler, Shared,
    filter::{ServerFilter, region},
    peers::Session,
    registry::ServerUpdate,
    routing::Request,
    strings::StringPool,
};

/// A heartbeat announces liveness. The reply asks the game server to
/// describe itself, correlated by a fresh random pair.
pub(crate) fn heartbeat<T>(req: Request<'_, T>) -> bool
where
    T: ServiceHandler,
{
    let (session, key) = req.shared.registry.heartbeat();
    log::debug!("heartbeat from {}", req.source);

    let mut writer = PacketWriter::new(MAX_PACKET);
    Header::new(PacketKind::GameMasterInfoRequest, 0, session as u32, key).encode(&mut writer);
    req.replies.push(writer.freeze());

    true
}

/// A game server describing itself; insert or refresh its registry record.
pub(crate) fn info_response<T>(mut req: Request<'_, T>) -> bool
where
    T: ServiceHandler,
{
    let game_type = req.reader.read_string();
    let mission_type = req.reader.read_string();

    if !is_printable(game_type) || !is_printable(mission_type) {
        log::debug!("unprintable type strings in info response from {}", req.source);
        return false;
    }

    let (Ok(game_type), Ok(mission_type)) =
        (str::from_utf8(game_type), str::from_utf8(mission_type))
    else {
        return false;
    };

    let max_players = req.reader.read_u8();
    let regions = req.reader.read_u32();
    let version = req.reader.read_u32();
    let info_flags = req.reader.read_u8();
    let bot_count = req.reader.read_u8();
    let cpu_speed = req.reader.read_u32();
    let player_count = req.reader.read_u8();

    if !req.reader.ok() {
        return false;
    }

    // Most games stop here; Tribes 2 appends the player GUID list. Only
    // read it when the payload actually holds that many entries.
    let mut player_guids = Vec::new();
    if player_count > 0 && req.reader.remaining() / 4 >= player_count as usize {
        player_guids.reserve(player_count as usize);
        for _ in 0..player_count {
            player_guids.push(req.reader.read_u32());
        }
    }

    let update = ServerUpdate {
        game_type: game_type.to_string(),
        mission_type: mission_type.to_string(),
        regions,
        version,
        cpu_speed,
        player_count,
        max_players,
        bot_count,
        info_flags,
        player_guids,
    };

    log::debug!(
        "info response from {}: game={:?} mission={:?} players={}/{}",
        req.source,
        game_type,
        mission_type,
        player_count,
        max_players
    );

    if req.shared.registry.update(req.source, &update, req.now) {
        req.handler.on_server_added(&req.source);
    }

    true
}

/// The distinct game and mission types currently known, for client-side
/// filter pickers. When both lists cannot fit one packet, each gets half the
/// payload and is cut at the entries that fit.
pub(crate) fn types_request<T>(req: Request<'_, T>) -> bool
where
    T: ServiceHandler,
{
    let mut writer = PacketWriter::new(MAX_PACKET);
    Header::new(
        PacketKind::GameTypesResponse,
        0,
        req.header.session,
        req.header.key,
    )
    .encode(&mut writer);

    let game_types = sorted(req.shared.registry.game_types());
    let mission_types = sorted(req.shared.registry.mission_types());

    let mut game_count = game_types.len();
    let mut mission_count = mission_types.len();

    let need = req.shared.registry.game_types().total_len()
        + req.shared.registry.mission_types().total_len()
        + game_count
        + mission_count
        + 2;

    if need > MAX_BODY || game_count > 0xFF || mission_count > 0xFF {
        let limit = MAX_BODY / 2;
        game_count = fit_within(&game_types, limit);
        mission_count = fit_within(&mission_types, limit);
    }

    writer.write_u8(game_count as u8);
    for text in &game_types[..game_count] {
        writer.write_string(text.as_bytes());
    }

    writer.write_u8(mission_count as u8);
    for text in &mission_types[..mission_count] {
        writer.write_string(text.as_bytes());
    }

    req.replies.push(writer.freeze());
    true
}

/// Who this master is and how many servers it lists.
pub(crate) fn info_request<T>(req: Request<'_, T>) -> bool
where
    T: ServiceHandler,
{
    let mut writer = PacketWriter::new(MAX_PACKET);
    Header::new(
        PacketKind::InfoResponse,
        0,
        req.header.session,
        req.header.key,
    )
    .encode(&mut writer);

    writer.write_string(req.name.as_bytes());
    writer.write_string(req.region.as_bytes());
    writer.write_u16(req.shared.registry.count() as u16);

    req.replies.push(writer.freeze());
    true
}

/// A list request: either a resend of an already built packet, or a fresh
/// filtered query.
pub(crate) fn list_request<T>(mut req: Request<'_, T>, extended: bool) -> bool
where
    T: ServiceHandler,
{
    // The extended request is the same body; it just commits the session to
    // the IPv6 capable response format.
    if extended {
        req.header.flags |= flags::NEW_STYLE_RESPONSE;
    }

    let index = req.reader.read_u8();
    if !req.reader.ok() {
        return false;
    }

    if index != FRESH_QUERY_INDEX {
        log::debug!("list resend request from {} for packet {index}", req.source);

        // An absent session is not an offence, the query may simply have
        // expired; ignore quietly.
        if let Some(session_index) = lookup_session(&mut req)
            && let Some(record) = req.shared.peers.record(&req.source)
            && let Some(session) = record.sessions.get(session_index)
        {
            send_page(req.replies, &req.header, session, index);
        }

        return true;
    }

    let game_type = req.reader.read_string();
    let mission_type = req.reader.read_string();

    if !is_printable(game_type) || !is_printable(mission_type) {
        log::debug!("unprintable query strings from {}", req.source);
        return false;
    }

    let (Ok(game_type), Ok(mission_type)) =
        (str::from_utf8(game_type), str::from_utf8(mission_type))
    else {
        return false;
    };

    let min_players = req.reader.read_u8();
    let max_players = req.reader.read_u8();
    let regions = req.reader.read_u32();
    let version = req.reader.read_u32();
    let filter_flags = req.reader.read_u8();
    let max_bots = req.reader.read_u8();
    let min_cpu_speed = req.reader.read_u16();

    let buddy_count = req.reader.read_u8();
    let mut buddies = Vec::with_capacity(buddy_count as usize);
    for _ in 0..buddy_count {
        buddies.push(req.reader.read_u32());
    }

    if !req.reader.ok() {
        return false;
    }

    log::debug!("list query from {}", req.source);

    let Some(session_index) = authenticate(&mut req) else {
        // Challenge in flight or session refused; either way the packet was
        // well-formed.
        return true;
    };

    let session_flags = req
        .shared
        .peers
        .record(&req.source)
        .and_then(|record| record.sessions.get(session_index))
        .map(|session| session.flags)
        .unwrap_or(0);

    // The session style dictates the default family bits: old style clients
    // can only ever see IPv4, new style ones default to both families.
    let mut regions = regions;
    if session_flags & flags::NEW_STYLE_RESPONSE != 0 {
        if regions & region::ADDRESS_MASK == 0 {
            regions |= region::ADDRESS_MASK;
        }
    } else {
        if regions & region::ADDRESS_MASK == 0 {
            regions |= region::IPV4;
        }
        regions &= !region::IPV6;
    }

    let filter = ServerFilter {
        game_type: game_type.to_string(),
        mission_type: mission_type.to_string(),
        min_players,
        max_players: max_players.max(min_players),
        regions,
        version,
        filter_flags,
        max_bots,
        min_cpu_speed,
        buddies,
    };

    let Shared { registry, peers } = &mut *req.shared;
    let Some(record) = peers.record_mut(&req.source) else {
        return true;
    };
    let Some(session) = record.sessions.get_mut(session_index) else {
        return true;
    };

    registry.query(session, &filter);

    log::debug!(
        "query for {} matched {} servers in {} packets",
        req.source,
        session.total,
        session.pack_total()
    );

    for index in 0..session.pages.len() {
        send_page(req.replies, &req.header, session, index as u8);
    }

    true
}

/// Session policy for a fresh query.
///
/// With challenge mode on, the query only proceeds on a session that has
/// completed the handshake; otherwise a challenge goes out and the caller
/// stops. With it off, every query opens a session that trusts the
/// client-chosen identifier.
fn authenticate<T>(req: &mut Request<'_, T>) -> Option<usize>
where
    T: ServiceHandler,
{
    let cap = req.shared.peers.session_cap();
    let header = req.header;
    let now = req.now;
    let challenge_mode = req.challenge_mode;

    let record = req.shared.peers.record_mut(&req.source)?;

    if challenge_mode {
        let session_index = match record.find_authenticated(header.session, now) {
            Some(index) => index,
            None => match record.create_session(&header, now, cap) {
                Some(index) => index,
                None => {
                    log::debug!("session cap reached for {}", req.source);
                    return None;
                }
            },
        };

        if !record.sessions[session_index].is_authenticated() {
            let token = record.issue_challenge(session_index);
            let session = &record.sessions[session_index];
            let reply = challenge_reply(&header, session.session, session.flags, token);

            req.replies.push(reply);
            req.handler.on_challenge_issued(&req.source);
            log::debug!("authentication challenge sent to {}", req.source);
            return None;
        }

        Some(session_index)
    } else {
        match record.create_session(&header, now, cap) {
            Some(index) => Some(index),
            None => {
                log::debug!("session cap reached for {}", req.source);
                None
            }
        }
    }
}

/// Session lookup for a resend, which never opens a session. A session that
/// exists but has not finished the handshake is challenged again.
fn lookup_session<T>(req: &mut Request<'_, T>) -> Option<usize>
where
    T: ServiceHandler,
{
    let header = req.header;
    let now = req.now;
    let challenge_mode = req.challenge_mode;

    let record = req.shared.peers.record_mut(&req.source)?;

    if challenge_mode {
        let session_index = record.find_authenticated(header.session, now)?;

        if !record.sessions[session_index].is_authenticated() {
            let token = record.issue_challenge(session_index);
            let session = &record.sessions[session_index];
            let reply = challenge_reply(&header, session.session, session.flags, token);

            req.replies.push(reply);
            req.handler.on_challenge_issued(&req.source);
            return None;
        }

        Some(session_index)
    } else {
        record.find_session(header.session as u16, now)
    }
}

/// The challenge packet: the header carries the issued token, the body
/// echoes the client's own correlation fields so it can match the reply to
/// its request.
fn challenge_reply(inbound: &Header, session: u16, session_flags: u8, token: u32) -> Bytes {
    let mut writer = PacketWriter::new(MAX_PACKET);
    Header::new(PacketKind::Challenge, session_flags, token, 0).encode(&mut writer);

    if inbound.is_authenticated() {
        writer.write_u32(inbound.session);
    } else {
        writer.write_u16(session);
        writer.write_u16(inbound.key);
    }

    writer.freeze()
}

/// One list response packet. A resend index past the built pages is a no-op.
fn send_page(replies: &mut Vec<Bytes>, inbound: &Header, session: &Session, index: u8) {
    let Some(page) = session.pages.get(index as usize) else {
        return;
    };

    let kind = if session.is_new_style() {
        PacketKind::ExtendedListResponse
    } else {
        PacketKind::ListResponse
    };

    let mut writer = PacketWriter::new(MAX_PACKET);
    Header::new(kind, session.flags, inbound.session, inbound.key).encode(&mut writer);
    writer.write_u8(index);
    writer.write_u8(session.pack_total());
    writer.write_u16(page.count);
    writer.write_bytes(&page.data);

    replies.push(writer.freeze());
}

fn sorted(pool: &StringPool) -> Vec<&str> {
    let mut entries: Vec<&str> = pool.iter().collect();
    entries.sort_unstable();
    entries
}

/// How many entries fit in `limit` bytes, each costing its length plus the
/// length prefix.
fn fit_within(entries: &[&str], limit: usize) -> usize {
    let mut used = 0;
    let mut count = 0;

    for text in entries {
        if used + text.len() + 1 > limit || count == 0xFF {
            break;
        }

        used += text.len() + 1;
        count += 1;
    }

    count
}
