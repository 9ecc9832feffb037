mod helpers;

pub(crate) use helpers::{non_empty, preview, truncate_chars};
