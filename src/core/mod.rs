pub mod duplicate;
pub mod features;
pub mod hash;
pub mod homography;
pub mod image;
pub mod matcher;
pub mod orb;
pub mod similarity;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
