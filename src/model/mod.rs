//! Structured representations of NWS text products.
//!
//! These types describe the *output* of the third-party text-product
//! parser this bridge depends on; the parser's own grammar is out of scope
//! (see `SPEC_FULL.md` §1).

mod product;
mod vtec;

pub use product::{Segment, TextProduct, WmoHeader};
pub use vtec::{Hvtec, Ugc, Vtec};
