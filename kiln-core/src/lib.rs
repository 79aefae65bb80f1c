//! Kiln Core
//!
//! Core types and abstractions for the Kiln CI system.
//!
//! This crate contains:
//! - Domain types: Pipeline, Work, PipelineLog and their status rules
//! - DTOs: the reporter calls exchanged between runner and coordinator
//! - Definition: the `.kiln.yml` pipeline file format

pub mod definition;
pub mod domain;
pub mod dto;
