//! # pinalbum
//!
//! Keeps a local photo album for each pin dropped on a map.
//!
//! For a pin, pinalbum searches a Flickr-style photo API inside a bounding
//! box around the point, stores the matching photo records in a durable
//! catalog, swaps the whole set out when a new collection is requested, and
//! serves image bytes from memory, from the catalog, or from the network.
//!
//! ## Modules
//!
//! - `search`: bounding-box photo search and response parsing
//! - `catalog`: durable pins and photo records, with change notifications
//! - `sync`: populate / replace a pin's collection, one operation per pin at a time
//! - `images`: memory → catalog → network image cache with shared downloads
//! - `transport`: the HTTP seam, backed by `reqwest`
//!
//! The core never assumes which thread calls it. A UI that renders results
//! is responsible for moving them onto its own rendering context.

pub mod catalog;
pub mod config;
pub mod error;
pub mod geo;
pub mod images;
pub mod mock;
pub mod search;
pub mod sync;
pub mod transport;
mod util;
