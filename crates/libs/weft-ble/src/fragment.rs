pub const FRAGMENT_HEADER_SIZE: usize = 5;
pub const MIN_MTU: usize = FRAGMENT_HEADER_SIZE + 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FragmentError {
    #[error("mtu {0} below minimum {MIN_MTU}")]
    MtuTooSmall(usize),

    #[error("fragment shorter than header: {0} bytes")]
    TooShort(usize),

    #[error("unknown fragment type: 0x{0:02x}")]
    UnknownType(u8),

    #[error("packet of {0} bytes exceeds the 16-bit fragment count")]
    TooLong(usize),
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum FragmentType {
    Start = 0x01,
    Middle = 0x02,
    End = 0x03,
}

impl FragmentType {
    fn from_byte(byte: u8) -> Result<Self, FragmentError> {
        match byte {
            0x01 => Ok(Self::Start),
            0x02 => Ok(Self::Middle),
            0x03 => Ok(Self::End),
            other => Err(FragmentError::UnknownType(other)),
        }
    }
}

/// 5-byte fragment header: type, then big-endian sequence and total.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct FragmentHeader {
    pub fragment_type: FragmentType,
    pub sequence: u16,
    pub total: u16,
}

impl FragmentHeader {
    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let sequence = self.sequence.to_be_bytes();
        let total = self.total.to_be_bytes();
        [self.fragment_type as u8, sequence[0], sequence[1], total[0], total[1]]
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FragmentError> {
        if bytes.len() < FRAGMENT_HEADER_SIZE {
            return Err(FragmentError::TooShort(bytes.len()));
        }

        Ok(Self {
            fragment_type: FragmentType::from_byte(bytes[0])?,
            sequence: u16::from_be_bytes([bytes[1], bytes[2]]),
            total: u16::from_be_bytes([bytes[3], bytes[4]]),
        })
    }
}

/// Splits a packet into MTU-sized fragments. A packet that fits in one
/// fragment is framed as END with total 1 and sequence 0.
pub fn fragment(packet: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, FragmentError> {
    if mtu < MIN_MTU {
        return Err(FragmentError::MtuTooSmall(mtu));
    }

    let payload_size = mtu - FRAGMENT_HEADER_SIZE;

    if packet.is_empty() {
        let header = FragmentHeader { fragment_type: FragmentType::End, sequence: 0, total: 1 };
        return Ok(vec![header.encode().to_vec()]);
    }

    let total = packet.len().div_ceil(payload_size);
    if total > u16::MAX as usize {
        return Err(FragmentError::TooLong(packet.len()));
    }

    let mut fragments = Vec::with_capacity(total);
    for (sequence, chunk) in packet.chunks(payload_size).enumerate() {
        let fragment_type = if sequence == total - 1 {
            FragmentType::End
        } else if sequence == 0 {
            FragmentType::Start
        } else {
            FragmentType::Middle
        };

        let header = FragmentHeader {
            fragment_type,
            sequence: sequence as u16,
            total: total as u16,
        };

        let mut out = Vec::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(chunk);
        fragments.push(out);
    }

    Ok(fragments)
}

/// Parses one received fragment into its header and payload view.
pub fn parse(fragment: &[u8]) -> Result<(FragmentHeader, &[u8]), FragmentError> {
    let header = FragmentHeader::decode(fragment)?;
    Ok((header, &fragment[FRAGMENT_HEADER_SIZE..]))
}
