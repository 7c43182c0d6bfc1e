//! hostpool placement — decides which hosts satisfy an allocation requirement.
//!
//! This crate does NOT reserve anything (that's `hostpool-allocator`). It
//! filters hosts against a requirement, ranks the survivors and picks hosts
//! per strategy, so the allocator can reserve on a working copy and commit.
//!
//! # Components
//!
//! - **`request`**: Allocation and recycle request/response types
//! - **`scorer`**: Eligibility checks and candidate ranking
//! - **`placer`**: Strategy selection (rack diversity, rack, host)
//! - **`ports`**: Free port picking within a range

pub mod error;
pub mod placer;
pub mod ports;
pub mod request;
pub mod scorer;

pub use error::{PlacementError, PlacementResult};
pub use placer::select_hosts;
pub use ports::pick_ports;
pub use request::*;
pub use scorer::{
    HostSlot, Rejection, check_eligibility, qualifying_disk, rank_candidates, rejection_summary,
};
