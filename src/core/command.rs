//! Purpose: Recognize the out-of-band seek command among inbound frames.
//! Exports: `SeekTo`, `parse_seek`, `SEEK_PREFIX`.
//! Role: Pure parser used by sessions before deciding between append and seek.
//! Invariants: Only `AESDCHAR_IOCSEEKTO:<u32>,<u32>` followed by the delimiter matches.
//! Invariants: Anything else, including near misses, is ordinary record data.
use crate::core::frame::FRAME_DELIMITER;

pub const SEEK_PREFIX: &[u8] = b"AESDCHAR_IOCSEEKTO:";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SeekTo {
    pub record: u32,
    pub offset: u32,
}

pub fn parse_seek(frame: &[u8]) -> Option<SeekTo> {
    let body = frame.strip_suffix(&[FRAME_DELIMITER])?;
    let args = body.strip_prefix(SEEK_PREFIX)?;
    let comma = args.iter().position(|&b| b == b',')?;
    let record = parse_u32(&args[..comma])?;
    let offset = parse_u32(&args[comma + 1..])?;
    Some(SeekTo { record, offset })
}

fn parse_u32(digits: &[u8]) -> Option<u32> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::{SeekTo, parse_seek};

    #[test]
    fn well_formed_command_parses() {
        assert_eq!(
            parse_seek(b"AESDCHAR_IOCSEEKTO:1,1\n"),
            Some(SeekTo { record: 1, offset: 1 })
        );
        assert_eq!(
            parse_seek(b"AESDCHAR_IOCSEEKTO:0,4294967295\n"),
            Some(SeekTo {
                record: 0,
                offset: u32::MAX
            })
        );
        assert_eq!(
            parse_seek(b"AESDCHAR_IOCSEEKTO:007,10\n"),
            Some(SeekTo { record: 7, offset: 10 })
        );
    }

    #[test]
    fn near_misses_are_data() {
        let cases: &[&[u8]] = &[
            b"AESDCHAR_IOCSEEKTO:1,1",
            b"AESDCHAR_IOCSEEKTO:1,1 \n",
            b"AESDCHAR_IOCSEEKTO:1,1\r\n",
            b"AESDCHAR_IOCSEEKTO: 1,1\n",
            b"AESDCHAR_IOCSEEKTO:1\n",
            b"AESDCHAR_IOCSEEKTO:1,\n",
            b"AESDCHAR_IOCSEEKTO:,1\n",
            b"AESDCHAR_IOCSEEKTO:-1,1\n",
            b"AESDCHAR_IOCSEEKTO:+1,1\n",
            b"AESDCHAR_IOCSEEKTO:1,2,3\n",
            b"AESDCHAR_IOCSEEKTO:4294967296,0\n",
            b"aesdchar_iocseekto:1,1\n",
            b"xAESDCHAR_IOCSEEKTO:1,1\n",
            b"hello\n",
            b"\n",
        ];
        for case in cases {
            assert_eq!(parse_seek(case), None, "{:?}", String::from_utf8_lossy(case));
        }
    }
}
