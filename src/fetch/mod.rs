//! Fetch collaborators
//!
//! The engine never downloads anything itself. It hands each attempt to a
//! [`Fetcher`] and expands playlists and channels through a [`MemberLister`].
//! [`YtDlp`] implements both by driving the external `yt-dlp` binary;
//! [`ToolUnavailable`] stands in when that binary is missing.

pub mod parser;
mod traits;
mod unavailable;
mod ytdlp;

pub use traits::{
    FetchOutput, FetchRequest, Fetcher, ListRequest, ListedMember, Listing, MemberLister,
    ProgressSink, ProgressUpdate,
};
pub use unavailable::ToolUnavailable;
pub use ytdlp::YtDlp;
