//! Threadquest — PostgreSQL persistence for quests, chapters and votes.

pub mod pg_quest_store;

pub use pg_quest_store::PgQuestStore;
