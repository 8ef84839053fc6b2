//! Hand-written fakes for every external collaborator

use async_trait::async_trait;
use jukebox_session::clients::{
    CredentialSource, Device, IssuedCredential, PlayRequest, PlayerApi, PlayerState, PlaylistApi,
    PlaylistSnapshot, PlaylistSummary, SearchDetails, SuggestedTrack, SuggestionRequest,
    SuggestionResponse, TrackRef, TrackSuggester,
};
use jukebox_session::device::{PlaybackSdk, SdkEvent, SdkLoader};
use jukebox_session::error::{ApiError, SdkError, SuggestionError, TokenError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const PLAYLIST_NAME: &str = "Test Playlist";
pub const PLAYLIST_ID: &str = "playlist-1";

// ============================================================================
// Credential source
// ============================================================================

pub struct FakeCredentialSource {
    pub fetches: AtomicUsize,
    pub failing: AtomicBool,
    expires_in: u64,
}

impl FakeCredentialSource {
    pub fn new(expires_in: u64) -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            expires_in,
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for FakeCredentialSource {
    async fn fetch(&self) -> Result<IssuedCredential, TokenError> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(TokenError::Unreachable("credential service down".to_string()));
        }
        Ok(IssuedCredential {
            access_token: format!("token-{}", n),
            expires_in: self.expires_in,
        })
    }
}

// ============================================================================
// Playback SDK
// ============================================================================

/// What a fake SDK instance does when connected
#[derive(Debug, Clone)]
pub enum SdkBehavior {
    /// Connect succeeds and the device reports ready
    Ready(String),
    /// Connect returns transport failure
    ConnectFails,
    /// Connect rejects the credential
    RejectCredential,
    /// Connect succeeds but no event ever arrives
    Silent,
    /// Connect succeeds, then an account error is reported
    AccountError,
}

pub struct FakeSdk {
    behavior: SdkBehavior,
    tx: mpsc::Sender<SdkEvent>,
    rx: Mutex<Option<mpsc::Receiver<SdkEvent>>>,
    pub tokens: Mutex<Vec<String>>,
    pub disconnected: AtomicBool,
}

impl FakeSdk {
    fn new(behavior: SdkBehavior) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            behavior,
            tx,
            rx: Mutex::new(Some(rx)),
            tokens: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Push a raw SDK event to the session
    pub async fn emit(&self, event: SdkEvent) {
        let _ = self.tx.send(event).await;
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackSdk for FakeSdk {
    async fn connect(&self, token: &str) -> Result<bool, SdkError> {
        self.tokens.lock().unwrap().push(token.to_string());
        match &self.behavior {
            SdkBehavior::Ready(device_id) => {
                let _ = self
                    .tx
                    .send(SdkEvent::Ready {
                        device_id: device_id.clone(),
                    })
                    .await;
                Ok(true)
            }
            SdkBehavior::ConnectFails => Ok(false),
            SdkBehavior::RejectCredential => {
                Err(SdkError::Authentication("invalid token".to_string()))
            }
            SdkBehavior::Silent => Ok(true),
            SdkBehavior::AccountError => {
                let _ = self
                    .tx
                    .send(SdkEvent::AccountError("premium required".to_string()))
                    .await;
                Ok(true)
            }
        }
    }

    fn take_events(&self) -> Option<mpsc::Receiver<SdkEvent>> {
        self.rx.lock().unwrap().take()
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

pub struct FakeSdkLoader {
    pub loads: AtomicUsize,
    load_delay: Duration,
    script: Mutex<VecDeque<SdkBehavior>>,
    default_behavior: SdkBehavior,
    pub instances: Mutex<Vec<Arc<FakeSdk>>>,
}

impl FakeSdkLoader {
    pub fn new(default_behavior: SdkBehavior) -> Self {
        Self::with_delay(default_behavior, Duration::ZERO)
    }

    pub fn with_delay(default_behavior: SdkBehavior, load_delay: Duration) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            load_delay,
            script: Mutex::new(VecDeque::new()),
            default_behavior,
            instances: Mutex::new(Vec::new()),
        }
    }

    /// Behaviours for the next loads, in order; afterwards the default applies
    pub fn script(self, behaviors: Vec<SdkBehavior>) -> Self {
        *self.script.lock().unwrap() = behaviors.into();
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn instance(&self, index: usize) -> Arc<FakeSdk> {
        Arc::clone(&self.instances.lock().unwrap()[index])
    }

    pub fn latest(&self) -> Arc<FakeSdk> {
        Arc::clone(self.instances.lock().unwrap().last().expect("no SDK loaded"))
    }
}

#[async_trait]
impl SdkLoader for FakeSdkLoader {
    async fn load(&self) -> Result<Arc<dyn PlaybackSdk>, SdkError> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);

        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.clone());
        let sdk = Arc::new(FakeSdk::new(behavior));
        self.instances.lock().unwrap().push(Arc::clone(&sdk));
        Ok(sdk)
    }
}

// ============================================================================
// Player API
// ============================================================================

pub fn device(id: &str) -> Device {
    Device {
        id: Some(id.to_string()),
        name: format!("Device {}", id),
        is_active: false,
        is_restricted: false,
        device_type: Some("Computer".to_string()),
    }
}

pub fn track(id: &str) -> TrackRef {
    TrackRef {
        id: Some(id.to_string()),
        uri: format!("spotify:track:{}", id),
        name: format!("Song {}", id),
        artists: vec![],
    }
}

pub fn player_state(device_id: &str, is_playing: bool, track_id: Option<&str>) -> PlayerState {
    PlayerState {
        device: Some(Device {
            is_active: true,
            ..device(device_id)
        }),
        is_playing,
        progress_ms: Some(1_000),
        item: track_id.map(track),
        context: None,
    }
}

pub struct FakePlayerApi {
    pub state: Mutex<Option<PlayerState>>,
    pub devices: Mutex<Vec<Device>>,
    pub calls: Mutex<Vec<String>>,
    /// Transfers make the target device the active one
    pub transfer_activates: AtomicBool,
    pub fail_transfer: AtomicBool,
    pub fail_play: AtomicBool,
    pub fail_resume: AtomicBool,
    pub player_state_error: Mutex<Option<ApiError>>,
    pub player_state_calls: AtomicU32,
}

impl FakePlayerApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            devices: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            transfer_activates: AtomicBool::new(true),
            fail_transfer: AtomicBool::new(false),
            fail_play: AtomicBool::new(false),
            fail_resume: AtomicBool::new(false),
            player_state_error: Mutex::new(None),
            player_state_calls: AtomicU32::new(0),
        }
    }

    /// Device listed by the remote API
    pub fn with_device(self, id: &str) -> Self {
        self.devices.lock().unwrap().push(device(id));
        self
    }

    pub fn set_state(&self, state: Option<PlayerState>) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_player_state_error(&self, error: Option<ApiError>) {
        *self.player_state_error.lock().unwrap() = error;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PlayerApi for FakePlayerApi {
    async fn player_state(&self) -> Result<Option<PlayerState>, ApiError> {
        self.player_state_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.player_state_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn devices(&self) -> Result<Vec<Device>, ApiError> {
        self.record("devices".to_string());
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<(), ApiError> {
        self.record(format!("transfer:{}:{}", device_id, play));
        if self.fail_transfer.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        if self.transfer_activates.load(Ordering::SeqCst) {
            let mut state = self.state.lock().unwrap();
            let previous = state.take();
            let mut next = player_state(device_id, play, None);
            if let Some(previous) = previous {
                next.item = previous.item;
                next.is_playing = play || previous.is_playing;
            }
            *state = Some(next);
        }
        Ok(())
    }

    async fn play(&self, device_id: &str, request: &PlayRequest) -> Result<(), ApiError> {
        self.record(format!(
            "play:{}:{}:{}",
            device_id,
            request.context_uri.clone().unwrap_or_default(),
            request.offset_uri.clone().unwrap_or_default()
        ));
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    async fn resume(&self, device_id: Option<&str>) -> Result<(), ApiError> {
        self.record(format!("resume:{}", device_id.unwrap_or("")));
        if self.fail_resume.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 404,
                message: "no active device".to_string(),
            });
        }
        Ok(())
    }

    async fn next(&self, device_id: &str) -> Result<(), ApiError> {
        self.record(format!("next:{}", device_id));
        Ok(())
    }

    async fn pause(&self, device_id: &str) -> Result<(), ApiError> {
        self.record(format!("pause:{}", device_id));
        Ok(())
    }
}

// ============================================================================
// Playlist API
// ============================================================================

pub struct FakePlaylistApi {
    pub playlist: Mutex<Option<PlaylistSnapshot>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_add: Mutex<Option<ApiError>>,
    snapshot_counter: AtomicU32,
}

impl FakePlaylistApi {
    pub fn new(track_ids: &[&str]) -> Self {
        Self {
            playlist: Mutex::new(Some(PlaylistSnapshot {
                id: PLAYLIST_ID.to_string(),
                snapshot_id: "snap-0".to_string(),
                tracks: track_ids.iter().map(|id| track(id)).collect(),
            })),
            calls: Mutex::new(Vec::new()),
            fail_add: Mutex::new(None),
            snapshot_counter: AtomicU32::new(0),
        }
    }

    pub fn missing() -> Self {
        let api = Self::new(&[]);
        *api.playlist.lock().unwrap() = None;
        api
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.playlist
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.track_ids())
            .unwrap_or_default()
    }

    /// Someone else edited the playlist
    pub fn edit_externally(&self, append: &str) {
        let snapshot = self.next_snapshot();
        if let Some(playlist) = self.playlist.lock().unwrap().as_mut() {
            playlist.tracks.push(track(append));
            playlist.snapshot_id = snapshot;
        }
    }

    /// Someone else reordered the playlist: new fingerprint, same tracks
    pub fn reorder_externally(&self) {
        let snapshot = self.next_snapshot();
        if let Some(playlist) = self.playlist.lock().unwrap().as_mut() {
            playlist.snapshot_id = snapshot;
        }
    }

    pub fn set_add_error(&self, error: Option<ApiError>) {
        *self.fail_add.lock().unwrap() = error;
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn next_snapshot(&self) -> String {
        format!("snap-{}", self.snapshot_counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PlaylistApi for FakePlaylistApi {
    async fn find_playlist_by_name(&self, name: &str) -> Result<Option<PlaylistSummary>, ApiError> {
        self.record(format!("find:{}", name));
        let playlist = self.playlist.lock().unwrap();
        Ok(playlist.as_ref().filter(|_| name == PLAYLIST_NAME).map(|p| PlaylistSummary {
            id: p.id.clone(),
            name: name.to_string(),
            snapshot_id: Some(p.snapshot_id.clone()),
        }))
    }

    async fn playlist(&self, playlist_id: &str) -> Result<PlaylistSnapshot, ApiError> {
        self.record(format!("get:{}", playlist_id));
        self.playlist
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::NotFound(playlist_id.to_string()))
    }

    async fn add_track(&self, playlist_id: &str, uri: &str) -> Result<Option<String>, ApiError> {
        self.record(format!("add:{}", uri));
        if let Some(e) = self.fail_add.lock().unwrap().clone() {
            return Err(e);
        }
        let snapshot = self.next_snapshot();
        let mut playlist = self.playlist.lock().unwrap();
        let playlist = playlist
            .as_mut()
            .ok_or_else(|| ApiError::NotFound(playlist_id.to_string()))?;
        let id = uri.rsplit(':').next().unwrap_or(uri);
        playlist.tracks.push(track(id));
        playlist.snapshot_id = snapshot.clone();
        Ok(Some(snapshot))
    }

    async fn remove_track(&self, playlist_id: &str, uri: &str) -> Result<Option<String>, ApiError> {
        self.record(format!("remove:{}", uri));
        let snapshot = self.next_snapshot();
        let mut playlist = self.playlist.lock().unwrap();
        let playlist = playlist
            .as_mut()
            .ok_or_else(|| ApiError::NotFound(playlist_id.to_string()))?;
        playlist.tracks.retain(|t| t.uri != uri);
        playlist.snapshot_id = snapshot.clone();
        Ok(Some(snapshot))
    }
}

// ============================================================================
// Track suggester
// ============================================================================

pub fn suggested(id: &str) -> SuggestedTrack {
    SuggestedTrack {
        id: id.to_string(),
        uri: format!("spotify:track:{}", id),
        name: format!("Suggested {}", id),
        artist: "Artist".to_string(),
        album: "Album".to_string(),
        popularity: 64,
        duration_ms: 200_000,
        preview_url: None,
    }
}

pub struct FakeSuggester {
    pub requests: Mutex<Vec<SuggestionRequest>>,
    responses: Mutex<VecDeque<Result<SuggestionResponse, SuggestionError>>>,
    delay: Mutex<Duration>,
    counter: AtomicU32,
    /// When the script is empty, invent a fresh track
    pub invent: AtomicBool,
}

impl FakeSuggester {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
            counter: AtomicU32::new(0),
            invent: AtomicBool::new(true),
        }
    }

    pub fn push(&self, response: Result<SuggestionResponse, SuggestionError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_track(&self, id: &str) {
        self.push(Ok(SuggestionResponse {
            track: Some(suggested(id)),
            search_details: SearchDetails {
                genres_tried: vec!["pop".to_string(), "rock".to_string()],
                attempts: 2,
            },
        }));
    }

    pub fn push_nothing(&self) {
        self.push(Ok(SuggestionResponse {
            track: None,
            search_details: SearchDetails {
                genres_tried: vec!["pop".to_string()],
                attempts: 5,
            },
        }));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SuggestionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TrackSuggester for FakeSuggester {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<SuggestionResponse, SuggestionError> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(response) = self.responses.lock().unwrap().pop_front() {
            return response;
        }
        if self.invent.load(Ordering::SeqCst) {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            return Ok(SuggestionResponse {
                track: Some(suggested(&format!("new{}", n))),
                search_details: SearchDetails {
                    genres_tried: vec!["rock".to_string()],
                    attempts: 1,
                },
            });
        }
        Ok(SuggestionResponse {
            track: None,
            search_details: SearchDetails::default(),
        })
    }
}
