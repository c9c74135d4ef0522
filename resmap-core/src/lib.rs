/*! This library models D3D12-style resource binding: descriptor heaps,
 *  root signatures made of inline descriptors and descriptor tables, and the
 *  resolution of shader registers to the descriptors a draw would read.
 *  It is meant to back capture and debugging tools, nothing is executed.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
    // Clashes with clippy::pattern_type_mismatch
    clippy::needless_borrowed_reference,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

pub mod binding_model;
pub mod command;
pub mod device;
pub mod error;
pub mod heap;
pub mod id;
mod identity;
pub mod inspect;
pub mod pipeline;
mod registry;
pub mod resolve;
pub mod resource;
pub mod storage;
pub mod view;

use std::borrow::Cow;

type Index = u32;
type Epoch = u32;

pub type Label<'a> = Option<Cow<'a, str>>;

/// Fast hash map used internally.
type FastHashMap<K, V> =
    std::collections::HashMap<K, V, std::hash::BuildHasherDefault<fxhash::FxHasher>>;

pub use binding_model::{RootBindingLayout, RootIndex, RootParameter, RootSignature};
pub use command::{CommandList, DrawCall};
pub use device::{Device, DeviceDescriptor, DeviceError};
pub use heap::{DescriptorHeap, DescriptorSlot};
pub use id::ResourceId;
pub use inspect::{inspect_draw, DrawReport};
pub use resolve::{resolve, BindingQuery, ResolvedBinding, RootArgument, RootArguments};
