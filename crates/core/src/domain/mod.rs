pub mod approval;
pub mod contract;
pub mod page;
