use std::{error::Error, fmt};

use crate::{
    binding_model::LayoutError,
    command::CommandError,
    device::DeviceError,
    heap::HeapError,
    pipeline::CreatePipelineError,
    resolve::ResolveError,
    resource::ResourceError,
    view::CreateViewError,
};

/// Coarse classification shared by every error of the binding model.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    CapacityExceeded,
    MisalignedView,
    OverlappingRange,
    RegisterGap,
    LayoutMismatch,
    UnresolvedBinding,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub trait Classify: Error {
    fn kind(&self) -> ErrorKind;
}

impl Classify for HeapError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::CapacityExceeded { .. } | Self::Full { .. } => ErrorKind::CapacityExceeded,
            Self::IncompatibleKind { .. } => ErrorKind::Other,
        }
    }
}

impl Classify for DeviceError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl Classify for ResourceError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl Classify for CreateViewError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Heap(ref inner) => inner.kind(),
            Self::Misaligned { .. } => ErrorKind::MisalignedView,
            _ => ErrorKind::Other,
        }
    }
}

impl Classify for LayoutError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::OverlappingRange { .. } => ErrorKind::OverlappingRange,
            Self::CapacityExceeded { .. } | Self::TooManyParameters { .. } => {
                ErrorKind::CapacityExceeded
            }
            Self::RegisterGap { .. } => ErrorKind::RegisterGap,
            Self::ZeroCount { .. } | Self::RegisterOverflow { .. } => ErrorKind::Other,
        }
    }
}

impl Classify for ResolveError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::UnresolvedBinding { .. } => ErrorKind::UnresolvedBinding,
            Self::LayoutMismatch { .. } => ErrorKind::LayoutMismatch,
            _ => ErrorKind::Other,
        }
    }
}

impl Classify for CreatePipelineError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::Layout(ref inner) => inner.kind(),
            _ => ErrorKind::Other,
        }
    }
}

impl Classify for CommandError {
    fn kind(&self) -> ErrorKind {
        match *self {
            Self::LayoutMismatch { .. } => ErrorKind::LayoutMismatch,
            Self::MisalignedRootOffset { .. } => ErrorKind::MisalignedView,
            Self::Resource(ref inner) => inner.kind(),
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmt::{DescriptorRangeType, RegisterBinding};

    #[test]
    fn nested_errors_keep_their_kind() {
        let heap = CreateViewError::Heap(HeapError::CapacityExceeded {
            index: 12,
            capacity: 12,
        });
        assert_eq!(heap.kind(), ErrorKind::CapacityExceeded);

        let gap = CreatePipelineError::Layout(LayoutError::RegisterGap {
            name: "res1".to_string(),
            binding: RegisterBinding {
                range_type: DescriptorRangeType::Srv,
                space: 0,
                register: 0,
            },
            element: 0,
            stage: rmt::ShaderStages::PIXEL,
        });
        assert_eq!(gap.kind(), ErrorKind::RegisterGap);
        assert_eq!(
            ResolveError::UnboundRootParameter(0).kind(),
            ErrorKind::Other
        );
        assert_eq!(
            CommandError::MisalignedRootOffset {
                offset: 4,
                alignment: 256,
            }
            .kind(),
            ErrorKind::MisalignedView
        );
    }
}
