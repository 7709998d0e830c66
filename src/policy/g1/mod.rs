//! A heap of equally sized regions.
//!
//! [`G1Heap`] owns the regions, the [`RegionLivenessMap`] marking fills in, and the
//! [`CollectionSetCandidates`] that a marking selects for later evacuation. A full
//! collection ([`G1Heap::full_collect`]) marks every region, then slides live objects
//! towards the bottom of the heap in four phases; see [`full`].

pub mod bot;
pub mod card_set;
pub mod collection_group;
pub mod collection_set_candidates;
pub mod full;
pub mod heap;
pub mod liveness;
pub mod policy;
pub mod region;
pub mod remset;

pub use self::collection_group::{CandidateInfo, CollectionGroup};
pub use self::collection_set_candidates::CollectionSetCandidates;
pub use self::full::G1FullCollector;
pub use self::heap::G1Heap;
pub use self::liveness::RegionLivenessMap;
pub use self::policy::{G1Policy, ProfileCostPolicy};
pub use self::region::{HeapRegion, RegionType};
