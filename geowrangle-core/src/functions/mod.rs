pub mod codec;
pub mod join;
pub mod kdtree;
pub mod metric;
pub mod neighbors;
pub mod polygonize;
pub mod topology;
pub mod transform;
