pub mod approval;
pub mod customer;
pub mod enquiry;
pub mod quotation;
