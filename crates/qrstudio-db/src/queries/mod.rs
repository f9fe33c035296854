pub mod profiles;
pub mod qrcodes;
