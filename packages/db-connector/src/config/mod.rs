//! Configuration for the database bootstrap.

pub mod db;
