//! Guest I/O operations given on the command line
//!
//! Syntax:
//! - `in` / `in:PORT` - read one byte
//! - `out:VALUE` - write one byte to the first device's port
//! - `out:PORT=VALUE` - write one byte to PORT

use std::str::FromStr;

use anyhow::{anyhow, bail, Context};

/// One guest port access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestOp {
    In { port: Option<u16> },
    Out { port: Option<u16>, value: u8 },
}

impl FromStr for GuestOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (verb, arg) = match s.split_once(':') {
            Some((verb, arg)) => (verb, Some(arg)),
            None => (s, None),
        };

        match (verb.to_ascii_lowercase().as_str(), arg) {
            ("in", None) => Ok(GuestOp::In { port: None }),
            ("in", Some(port)) => Ok(GuestOp::In {
                port: Some(parse_num(port).context("invalid port")?),
            }),
            ("out", Some(arg)) => match arg.split_once('=') {
                Some((port, value)) => Ok(GuestOp::Out {
                    port: Some(parse_num(port).context("invalid port")?),
                    value: parse_num(value).context("invalid value")?,
                }),
                None => Ok(GuestOp::Out {
                    port: None,
                    value: parse_num(arg).context("invalid value")?,
                }),
            },
            ("out", None) => bail!("'out' needs a value, e.g. out:0x01"),
            _ => bail!("unknown operation '{}' (expected in[:PORT] or out:[PORT=]VALUE)", s),
        }
    }
}

fn parse_num<T>(s: &str) -> anyhow::Result<T>
where
    T: TryFrom<u64>,
{
    let s = s.trim();
    let raw = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => s.parse::<u64>()?,
    };
    T::try_from(raw).map_err(|_| anyhow!("{} out of range", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_in() {
        assert_eq!("in".parse::<GuestOp>().unwrap(), GuestOp::In { port: None });
        assert_eq!(
            "IN:0x600".parse::<GuestOp>().unwrap(),
            GuestOp::In { port: Some(0x600) }
        );
    }

    #[test]
    fn test_parse_out() {
        assert_eq!(
            "out:0x01".parse::<GuestOp>().unwrap(),
            GuestOp::Out { port: None, value: 1 }
        );
        assert_eq!(
            "out:1285=255".parse::<GuestOp>().unwrap(),
            GuestOp::Out {
                port: Some(0x505),
                value: 0xff
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("out".parse::<GuestOp>().is_err());
        assert!("out:0x100".parse::<GuestOp>().is_err());
        assert!("in:0x10000".parse::<GuestOp>().is_err());
        assert!("poke:1".parse::<GuestOp>().is_err());
    }
}
