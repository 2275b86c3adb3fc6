/// Raw channel label as reported by a recording.
/// Examples: `C3-M2`, `Chin1-Chin2`, `SaO2`
pub type ChannelName = String;
/// Subject folder name in the recording archive.
/// Example: `sub-S0001111192396`
pub type SubjectFolder = String;
/// Session identifier within a subject folder.
/// Examples: `1`, `2`
pub type SessionId = String;
/// Acquisition site identifier.
/// Example: `S0001`
pub type SiteId = String;
/// Free-text event description from an annotation log.
/// Examples: `Sleep_stage_N2`, `Sleep_stage_REM`, `Lights_off`
pub type EventLabel = String;
/// Integer class id fed to the model.
/// Examples: `0` (REM), `4` (wake)
pub type ClassId = u8;
/// Tag identifying what a checkpoint file tracks.
/// Examples: `CHUNKS`, `ROWS`
pub type ModeTag = String;
