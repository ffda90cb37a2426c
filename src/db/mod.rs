pub mod agent_repository;
