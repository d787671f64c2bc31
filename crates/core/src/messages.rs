//! Coordinator/worker message vocabulary.
//!
//! Inside the process both directions are closed enums. The worker to
//! coordinator endpoint carries the raw [`WireMessage`] frame, and the
//! coordinator decodes every frame with [`ToMaster::try_from`]: an unknown
//! kind or a kind from the other direction is a protocol violation.

use std::fmt;

use crate::error::Error;
use crate::ids::ResourceId;

/// Resource field value meaning "no resource".
pub const NO_RESOURCE: i32 = -1;

/// Numeric message kinds of the frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Any = 0,
    // coordinator -> worker
    Process = 1,
    Allocate = 2,
    // worker -> coordinator
    Request = 3,
    Release = 4,
    Idle = 5,
    ReleaseAllAndTerminate = 6,
}

impl MessageKind {
    /// Parse a raw kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMessageKind`] when `raw` names no kind.
    pub fn from_u32(raw: u32) -> Result<Self, Error> {
        match raw {
            0 => Ok(Self::Any),
            1 => Ok(Self::Process),
            2 => Ok(Self::Allocate),
            3 => Ok(Self::Request),
            4 => Ok(Self::Release),
            5 => Ok(Self::Idle),
            6 => Ok(Self::ReleaseAllAndTerminate),
            kind => Err(Error::UnknownMessageKind { kind }),
        }
    }
}

/// Raw frame exchanged on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireMessage {
    pub kind: u32,
    pub resource: i32,
}

impl WireMessage {
    #[must_use]
    pub const fn new(kind: u32, resource: i32) -> Self {
        Self { kind, resource }
    }
}

/// Messages sent by the coordinator to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToWorker {
    /// Take your turn and reply with exactly one [`ToMaster`] message.
    Process,
    /// A unit of the resource has been granted.
    Allocate(ResourceId),
}

/// Messages sent by a worker to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToMaster {
    Request(ResourceId),
    Release(ResourceId),
    Idle,
    /// The worker is exiting voluntarily; everything it holds goes back.
    ReleaseAllAndTerminate,
}

impl ToMaster {
    #[must_use]
    pub const fn kind(self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Release(_) => MessageKind::Release,
            Self::Idle => MessageKind::Idle,
            Self::ReleaseAllAndTerminate => MessageKind::ReleaseAllAndTerminate,
        }
    }
}

impl fmt::Display for ToMaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(res) => write!(f, "REQUEST({res})"),
            Self::Release(res) => write!(f, "RELEASE({res})"),
            Self::Idle => write!(f, "IDLE"),
            Self::ReleaseAllAndTerminate => write!(f, "RELEASE_ALL_AND_TERMINATE"),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
impl From<ToMaster> for WireMessage {
    fn from(msg: ToMaster) -> Self {
        let resource = match msg {
            ToMaster::Request(res) | ToMaster::Release(res) => res.index() as i32,
            ToMaster::Idle | ToMaster::ReleaseAllAndTerminate => NO_RESOURCE,
        };
        Self::new(msg.kind() as u32, resource)
    }
}

impl TryFrom<WireMessage> for ToMaster {
    type Error = Error;

    fn try_from(frame: WireMessage) -> Result<Self, Self::Error> {
        let resource = || {
            usize::try_from(frame.resource)
                .map(ResourceId::new)
                .map_err(|_| Error::MissingResource {
                    kind: frame.kind,
                    resource: frame.resource,
                })
        };

        match MessageKind::from_u32(frame.kind)? {
            MessageKind::Request => Ok(Self::Request(resource()?)),
            MessageKind::Release => Ok(Self::Release(resource()?)),
            MessageKind::Idle => Ok(Self::Idle),
            MessageKind::ReleaseAllAndTerminate => Ok(Self::ReleaseAllAndTerminate),
            MessageKind::Any | MessageKind::Process | MessageKind::Allocate => {
                Err(Error::WrongDirection {
                    kind: frame.kind,
                    direction: "worker->master",
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_decode_request() {
        let msg = ToMaster::try_from(WireMessage::new(3, 7)).unwrap();
        assert_eq!(msg, ToMaster::Request(ResourceId::new(7)));
    }

    #[test]
    fn test_encode_idle_has_no_resource() {
        let frame = WireMessage::from(ToMaster::Idle);
        assert_eq!(frame, WireMessage::new(5, NO_RESOURCE));
    }

    #[test]
    fn test_encode_release_carries_resource() {
        let frame = WireMessage::from(ToMaster::Release(ResourceId::new(4)));
        assert_eq!(frame, WireMessage::new(4, 4));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = ToMaster::try_from(WireMessage::new(99, NO_RESOURCE)).unwrap_err();
        assert!(matches!(err, Error::UnknownMessageKind { kind: 99 }));
        assert!(err.is_protocol());
    }

    #[test]
    fn test_coordinator_kind_on_worker_channel_is_rejected() {
        let err = ToMaster::try_from(WireMessage::new(2, 1)).unwrap_err();
        assert!(matches!(err, Error::WrongDirection { kind: 2, .. }));
    }

    #[test]
    fn test_request_without_resource_is_rejected() {
        let err = ToMaster::try_from(WireMessage::new(3, NO_RESOURCE)).unwrap_err();
        assert!(matches!(err, Error::MissingResource { .. }));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ToMaster::Request(ResourceId::new(2)).to_string(),
            "REQUEST(R2)"
        );
        assert_eq!(
            ToMaster::ReleaseAllAndTerminate.to_string(),
            "RELEASE_ALL_AND_TERMINATE"
        );
    }
}
