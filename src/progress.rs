//! Turns gamdl's console output into structured progress.
//!
//! The tool writes yt-dlp style progress lines interleaved with its own log lines. Output
//! arrives in arbitrary chunks, so every chunk is split into lines (on `\n` as well as the
//! `\r` yt-dlp uses to redraw its progress line) and each line is matched on its own.
//! Lines that match nothing are simply ignored.

use std::fmt;

use lazy_regex::regex_captures;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eta {
    Known(String),
    /// The tool printed `ETA Unknown`.
    Unresolved,
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(eta) => f.write_str(eta),
            Self::Unresolved => f.write_str("calculating"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentProgress {
    pub percentage: f64,
    pub total_size: String,
    pub speed: String,
    pub eta: Eta,
    pub fragment: (u32, u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionStats {
    pub total_size: String,
    /// Elapsed time as printed by the tool, e.g. `00:03`.
    pub duration: String,
    pub average_speed: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongInfo {
    pub title: String,
    pub track: (u32, u32),
    pub url: (u32, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    Fragment(FragmentProgress),
    Completed(CompletionStats),
    /// A new song started downloading.
    Started,
    Song(SongInfo),
    /// The current song finished.
    Finished,
}

/// Parse every line in `chunk`, in order.
pub fn parse_chunk(chunk: &str) -> Vec<ParsedEvent> {
    chunk
        .split(&['\n', '\r'][..])
        .filter(|line| !line.is_empty())
        .flat_map(parse_line)
        .collect()
}

/// Parse a single line. One line can produce several events.
pub fn parse_line(line: &str) -> Vec<ParsedEvent> {
    let mut events = Vec::new();

    if let Some(fragment) = parse_fragment(line) {
        events.push(ParsedEvent::Fragment(fragment));
    }

    if line.contains("100% of") && line.contains("in") {
        if let Some(stats) = parse_completion(line) {
            events.push(ParsedEvent::Completed(stats));
        }
    }

    if line.contains("[INFO") && line.contains("Downloading song") {
        events.push(ParsedEvent::Started);
    }

    if let Some(song) = parse_song(line) {
        events.push(ParsedEvent::Song(song));
    }

    if line.contains("Download completed successfully") {
        events.push(ParsedEvent::Finished);
    }

    events
}

fn parse_fragment(line: &str) -> Option<FragmentProgress> {
    let (_, pct, size, size_unit, speed, speed_unit, eta, frag, frags) = regex_captures!(
        r"\[download\]\s+(\d+(?:\.\d+)?)%\s+of\s+~\s+([\d.]+)([KMGT]?i?B)\s+at\s+([\d.]+)([KMGT]?i?B/s)\s+ETA\s+([\d:]+|Unknown)\s+\(frag\s+(\d+)/(\d+)\)",
        line
    )?;

    let eta = match eta {
        "Unknown" => Eta::Unresolved,
        eta => Eta::Known(eta.to_string()),
    };

    Some(FragmentProgress {
        percentage: pct.parse().ok()?,
        total_size: format!("{size}{size_unit}"),
        speed: format!("{speed}{speed_unit}"),
        eta,
        fragment: (frag.parse().ok()?, frags.parse().ok()?),
    })
}

fn parse_completion(line: &str) -> Option<CompletionStats> {
    let (_, size, size_unit, duration, speed, speed_unit) = regex_captures!(
        r"100%\s+of\s+([\d.]+)([KMGT]?i?B)\s+in\s+([\d:]+)\s+at\s+([\d.]+)([KMGT]?i?B/s)",
        line
    )?;

    Some(CompletionStats {
        total_size: format!("{size}{size_unit}"),
        duration: duration.to_string(),
        average_speed: format!("{speed}{speed_unit}"),
    })
}

fn parse_song(line: &str) -> Option<SongInfo> {
    let (_, track, tracks, url, urls, title) = regex_captures!(
        r#"\(Track\s+(\d+)/(\d+)\s+from\s+URL\s+(\d+)/(\d+)\)\s+"([^"]+)""#,
        line
    )?;

    Some(SongInfo {
        title: title.to_string(),
        track: (track.parse().ok()?, tracks.parse().ok()?),
        url: (url.parse().ok()?, urls.parse().ok()?),
    })
}

/// What the front end shows, rebuilt from parsed events. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    pub percentage: f64,
    pub text: String,
    pub total_size: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<Eta>,
    pub fragment: Option<(u32, u32)>,
    pub song: Option<SongInfo>,
    pub song_status: Option<String>,
    pub final_stats: Option<CompletionStats>,
}

impl ProgressState {
    pub fn apply(&mut self, event: &ParsedEvent) {
        match event {
            ParsedEvent::Fragment(progress) => {
                self.percentage = progress.percentage;

                let mut text = format!("downloading {:.1}%", progress.percentage);
                if let Eta::Known(eta) = &progress.eta {
                    text += &format!(" | eta {eta}");
                }
                text += &format!(" | speed {}", progress.speed);
                let (frag, frags) = progress.fragment;
                if frags > 1 {
                    text += &format!(" | fragment {frag}/{frags}");
                }
                self.text = text;

                self.total_size = Some(progress.total_size.clone());
                self.speed = Some(progress.speed.clone());
                self.eta = Some(progress.eta.clone());
                self.fragment = Some(progress.fragment);

                if self.song.is_some() {
                    self.set_song_status(format!("downloading {:.1}%", progress.percentage));
                }
            }
            ParsedEvent::Completed(stats) => {
                self.percentage = 100.0;
                self.text = format!(
                    "download complete! size {} | took {} | average speed {}",
                    stats.total_size, stats.duration, stats.average_speed
                );
                self.total_size = Some(stats.total_size.clone());
                self.speed = Some(stats.average_speed.clone());
                self.final_stats = Some(stats.clone());
            }
            ParsedEvent::Started => {
                self.percentage = 0.0;
                self.text = "starting song download...".to_string();
            }
            ParsedEvent::Song(song) => {
                self.song = Some(song.clone());

                let position = song_position(song);
                self.song_status = Some(if position.is_empty() {
                    "downloading...".to_string()
                } else {
                    position
                });
            }
            ParsedEvent::Finished => {
                if self.song.is_some() {
                    self.set_song_status("finished".to_string());
                }
            }
        }
    }

    fn set_song_status(&mut self, status: String) {
        let Some(song) = &self.song else {
            return;
        };

        let mut text = status;
        let (track, tracks) = song.track;
        if tracks > 1 {
            text += &format!(" - track {track}/{tracks}");
        }
        let (url, urls) = song.url;
        if urls > 1 {
            text += &format!(" (url {url}/{urls})");
        }

        self.song_status = Some(text);
    }
}

fn song_position(song: &SongInfo) -> String {
    let mut parts = Vec::new();

    let (track, tracks) = song.track;
    if tracks > 1 {
        parts.push(format!("track {track}/{tracks}"));
    }
    let (url, urls) = song.url;
    if urls > 1 {
        parts.push(format!("url {url}/{urls}"));
    }

    parts.join(" | ")
}
