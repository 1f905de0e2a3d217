//! Arena-resident runtime structures: entities and the scope chain

pub mod entity;
pub mod scope;
