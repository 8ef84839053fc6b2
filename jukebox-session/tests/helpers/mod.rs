//! Test helper modules for jukebox-session integration tests
//!
//! - fakes: in-memory stand-ins for the SDK, Web API, suggester and
//!   credential source
//! - rig: pre-wired device sessions and full engines around the fakes

#![allow(dead_code)]

pub mod fakes;
pub mod rig;

pub use fakes::{
    device, player_state, suggested, track, FakeCredentialSource, FakePlayerApi, FakePlaylistApi,
    FakeSdk, FakeSdkLoader, FakeSuggester, SdkBehavior, PLAYLIST_ID, PLAYLIST_NAME,
};
pub use rig::{
    drain_events, memory_pool, settle, test_config, wait_for, EngineRig, SessionRig, DEVICE_ID,
};
