// Database schema definitions and migrations
// This module contains the SQL schema for the integrity core database

pub const CREDENTIALS_SCHEMA: &str = include_str!("../../migrations/001_credentials.sql");
pub const VOTES_SCHEMA: &str = include_str!("../../migrations/002_votes.sql");

pub const MIGRATIONS: &[(&str, &str)] = &[
    ("001_credentials", CREDENTIALS_SCHEMA),
    ("002_votes", VOTES_SCHEMA),
];
