//! Test fixtures shared across the workspace: a deterministic scripted
//! vendor [`provider::ScriptedProvider`] and a [`recovery`] harness for
//! crash/restart scenarios.

pub mod provider;
pub mod recovery;
