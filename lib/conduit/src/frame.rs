use crate::support::{WireError, WireResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Hard cap on a single frame body. Needs headroom for broadcast file
/// uploads, which ship whole files inside one message.
pub const MAX_FRAME_SIZE: usize = 128 * 1024 * 1024;

/// Write one message as a length-prefixed frame.
#[inline]
pub fn write_frame<W: Write, T: Serialize>(stream: &mut W, msg: &T) -> WireResult<()> {
    let body = bincode::serialize(msg)?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(WireError::TooLarge(body.len()));
    }

    stream.write_u32::<BigEndian>(body.len() as u32)?;
    stream.write_all(&body)?;
    stream.flush()?;
    Ok(())
}

/// Read one length-prefixed frame and decode the body.
#[inline]
pub fn read_frame<R: Read, T: DeserializeOwned>(stream: &mut R) -> WireResult<T> {
    let size = stream.read_u32::<BigEndian>()? as usize;

    if size > MAX_FRAME_SIZE {
        return Err(WireError::TooLarge(size));
    }

    let mut body = vec![0u8; size];
    stream.read_exact(&mut body)?;

    Ok(bincode::deserialize(&body)?)
}
