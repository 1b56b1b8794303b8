//! Small shared helpers: size conversions and layout/alignment math.

pub(crate) mod layout;
pub(crate) mod size;
