use crate::{
    Error, PacketKind,
    kinds::flags,
    packet::{PacketReader, PacketWriter},
};

/// The framing every packet starts with.
///
/// The layout branches on [`flags::AUTHENTICATED_SESSION`]: authenticated
/// packets replace the 16-bit `(session, key)` pair with a single 32-bit
/// session token, so `session` is held as a `u32` and `key` is zero in the
/// authenticated form.
///
/// ```
/// use master_server_codec::{Header, PacketKind, PacketReader, PacketWriter, kinds::flags};
///
/// let header = Header {
///     kind: PacketKind::ListRequest,
///     flags: flags::NEW_STYLE_RESPONSE,
///     session: 0x1234,
///     key: 0x5678,
/// };
///
/// let mut writer = PacketWriter::new(16);
/// header.encode(&mut writer);
///
/// let bytes = writer.freeze();
/// let mut reader = PacketReader::new(&bytes);
/// assert_eq!(Header::decode(&mut reader).unwrap(), header);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketKind,
    pub flags: u8,
    pub session: u32,
    pub key: u16,
}

impl Header {
    pub fn new(kind: PacketKind, flags: u8, session: u32, key: u16) -> Self {
        Self {
            kind,
            flags,
            session,
            key,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.flags & flags::AUTHENTICATED_SESSION != 0
    }

    pub fn decode(reader: &mut PacketReader<'_>) -> Result<Self, Error> {
        let kind = reader.read_u8();
        let flags = reader.read_u8();

        let (session, key) = if flags & flags::AUTHENTICATED_SESSION != 0 {
            (reader.read_u32(), 0)
        } else {
            (reader.read_u16() as u32, reader.read_u16())
        };

        if !reader.ok() {
            return Err(Error::Truncated);
        }

        Ok(Self {
            kind: PacketKind::try_from(kind).map_err(|_| Error::UnknownKind(kind))?,
            flags,
            session,
            key,
        })
    }

    pub fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.kind.into());
        writer.write_u8(self.flags);

        if self.is_authenticated() {
            writer.write_u32(self.session);
        } else {
            writer.write_u16(self.session as u16);
            writer.write_u16(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_round_trip() {
        let header = Header::new(
            PacketKind::ListRequest,
            flags::AUTHENTICATED_SESSION | flags::NEW_STYLE_RESPONSE,
            0xDEADBEEF,
            0,
        );

        let mut writer = PacketWriter::new(16);
        header.encode(&mut writer);

        // kind, flags, u32 session.
        assert_eq!(writer.len(), 6);

        let bytes = writer.freeze();
        let mut reader = PacketReader::new(&bytes);
        assert_eq!(Header::decode(&mut reader).unwrap(), header);
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let mut reader = PacketReader::new(&[0xEE, 0x00, 0x01, 0x00, 0x02, 0x00]);
        assert_eq!(Header::decode(&mut reader), Err(Error::UnknownKind(0xEE)));
    }

    #[test]
    fn short_header_is_an_error() {
        let mut reader = PacketReader::new(&[22, 0x00, 0x01]);
        assert_eq!(Header::decode(&mut reader), Err(Error::Truncated));
    }
}
