pub mod haplogroup;
pub mod sex;
