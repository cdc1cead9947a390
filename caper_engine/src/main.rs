use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;

use caper_engine::context::{ActorHandle, ResourceKind};
use caper_engine::headless::{build_context, JournalEntry, MemoryResources, ScriptedEvents};
use caper_engine::sequence::SEQUENCE_SLOTS;
use caper_engine::{
    ConversationOutcome, ConversationWalker, SequenceInterpreter, SequenceOutcome, Speaker,
    TitleConfig, WaitKind,
};

/// Headless playback harness for compiled sequence and conversation
/// resources. Runs one script driver to completion against recording
/// collaborators and prints (or dumps) the transcript.
#[derive(Parser, Debug)]
#[command(about = "Run sequence/conversation scripts headlessly", version)]
struct Args {
    /// Directory holding `sequence-<id>-<variant>.bin`,
    /// `strip-<id>-<variant>.bin` and `message-<res>-<line>.txt` resources
    #[arg(long)]
    data_root: PathBuf,

    /// Sequence resource id to run
    #[arg(long)]
    sequence: Option<u16>,

    /// Conversation script id to run
    #[arg(long)]
    strip: Option<u16>,

    /// Decode dialogue tables with the extended-title record layout
    #[arg(long)]
    extended: bool,

    /// Auto-answer keys for choice prompts, in order (e.g. "132")
    #[arg(long)]
    choose: Option<String>,

    /// Speakers to register, as NAME or NAME:close-up-scene-id
    #[arg(long = "speaker")]
    speakers: Vec<String>,

    /// Pre-registered actor count (handles 0..n)
    #[arg(long, default_value_t = 6)]
    actors: u8,

    /// Scene id the run starts in
    #[arg(long, default_value_t = 100)]
    scene: u16,

    /// Write the run transcript as JSON
    #[arg(long)]
    transcript_json: Option<PathBuf>,

    /// Safety cap on simulated frames
    #[arg(long, default_value_t = 200_000)]
    max_frames: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    execute(args)
}

fn execute(args: Args) -> Result<()> {
    let resources = load_resources(&args.data_root)
        .with_context(|| format!("loading resources from {}", args.data_root.display()))?;

    let mut events = ScriptedEvents::new();
    if let Some(keys) = args.choose.as_deref() {
        for key in keys.chars() {
            events.push_auto_key(key);
        }
    }

    let config = if args.extended {
        TitleConfig::extended()
    } else {
        TitleConfig::classic()
    };
    let (mut ctx, journal) = build_context(
        config,
        resources,
        events,
        args.scene,
        args.actors as usize,
    );

    for spec in &args.speakers {
        let (name, scene) = match spec.split_once(':') {
            Some((name, scene)) => (
                name,
                Some(
                    scene
                        .parse::<u16>()
                        .with_context(|| format!("bad close-up scene in --speaker {spec}"))?,
                ),
            ),
            None => (spec.as_str(), None),
        };
        let mut speaker = Speaker::new(name);
        speaker.scene = scene;
        ctx.speakers
            .add_speaker(speaker)
            .context("registering speaker")?;
    }

    let mut frames: u64 = 0;
    let mut sequence = SequenceInterpreter::new();
    let mut walker = ConversationWalker::new();

    enum Active {
        Sequence,
        Conversation,
        Done,
    }

    let mut active = if let Some(id) = args.sequence {
        let mut slots = [None; SEQUENCE_SLOTS];
        for (idx, slot) in slots.iter_mut().enumerate().take(args.actors as usize) {
            *slot = Some(ActorHandle(idx as u32));
        }
        sequence.attach(&mut ctx, id, slots)?;
        Active::Sequence
    } else if let Some(id) = args.strip {
        walker.start(&mut ctx, id, true);
        Active::Conversation
    } else {
        bail!("nothing to run: pass --sequence or --strip");
    };

    loop {
        if frames > args.max_frames {
            bail!("frame cap of {} exceeded; script does not terminate", args.max_frames);
        }

        match active {
            Active::Sequence => match sequence.step(&mut ctx)? {
                SequenceOutcome::Waiting(WaitKind::Delay(delay)) => {
                    // Skip the clock forward; nothing else runs headlessly.
                    frames += u64::from(delay.max(1));
                    while !sequence.tick() {}
                }
                SequenceOutcome::Waiting(_) => {
                    // Animations, movers and cues complete instantly here.
                    frames += 1;
                }
                SequenceOutcome::Finished => active = Active::Done,
                SequenceOutcome::StartConversation { id } => {
                    walker.start(&mut ctx, id, true);
                    active = Active::Conversation;
                }
                SequenceOutcome::StartSequence { id, actors, .. } => {
                    sequence.attach(&mut ctx, id, actors)?;
                }
            },
            Active::Conversation => match walker.signal(&mut ctx)? {
                ConversationOutcome::Waiting { delay } => {
                    frames += u64::from(delay.max(1));
                    while !walker.tick() {}
                }
                ConversationOutcome::Finished | ConversationOutcome::Quit => {
                    active = Active::Done;
                }
                ConversationOutcome::StartSequence { id } => {
                    sequence.attach(&mut ctx, id, [None; SEQUENCE_SLOTS])?;
                    active = Active::Sequence;
                }
            },
            Active::Done => break,
        }
    }

    let entries = journal.borrow();
    println!("{} transcript events over {frames} frames", entries.len());
    for entry in entries.iter() {
        println!("  {}", describe(entry));
    }

    if let Some(path) = args.transcript_json.as_ref() {
        let json = serde_json::to_string_pretty(&*entries)
            .context("serializing transcript to JSON")?;
        fs::write(path, &json)
            .with_context(|| format!("writing transcript to {}", path.display()))?;
        println!("Saved transcript to {}", path.display());
    }

    Ok(())
}

fn describe(entry: &JournalEntry) -> String {
    match entry {
        JournalEntry::TextShown { slot, text } => format!("{slot}: \"{text}\""),
        JournalEntry::TextRemoved { slot } => format!("{slot} removed"),
        JournalEntry::Alert { text } => format!("alert: {text}"),
        JournalEntry::PanelOpened { .. } => "choice panel opened".to_string(),
        JournalEntry::PanelClosed => "choice panel closed".to_string(),
        JournalEntry::PromptLine { text, color } => format!("prompt [{color}]: {text}"),
        JournalEntry::SceneLoaded { id } => format!("scene {id} loaded"),
        JournalEntry::ZoomCurve {
            y_start,
            min_percent,
            y_end,
            max_percent,
        } => format!("zoom curve {y_start}:{min_percent}% -> {y_end}:{max_percent}%"),
        JournalEntry::ScrollFollower { actor } => match actor {
            Some(actor) => format!("camera follows actor {actor}"),
            None => "camera follows nobody".to_string(),
        },
        JournalEntry::SoundPlayed { id, notify } => format!("sound {id} (notify={notify})"),
        JournalEntry::ActorOp { actor, op } => format!("actor {actor}: {op}"),
        JournalEntry::StripCallback { id } => format!("callback {id}"),
        JournalEntry::SequenceCallback { a, b } => format!("sequence callback {a},{b}"),
        JournalEntry::ConversationEnded => "conversation ended".to_string(),
    }
}

/// Loads every recognized resource file under `root`. Names follow the
/// `<kind>-<id>-<variant>.bin` / `message-<res>-<line>.txt` convention.
fn load_resources(root: &Path) -> Result<MemoryResources> {
    let mut resources = MemoryResources::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        if let Some(stem) = name.strip_suffix(".bin") {
            let mut parts = stem.splitn(3, '-');
            let kind = match parts.next() {
                Some("sequence") => ResourceKind::Sequence,
                Some("strip") => ResourceKind::Strip,
                _ => continue,
            };
            let (Some(id), Some(variant)) = (parts.next(), parts.next()) else {
                continue;
            };
            let (Ok(id), Ok(variant)) = (id.parse::<u16>(), variant.parse::<u16>()) else {
                continue;
            };
            let bytes = fs::read(entry.path())
                .with_context(|| format!("reading {}", entry.path().display()))?;
            resources.insert(kind, id, variant, bytes);
        } else if let Some(stem) = name.strip_suffix(".txt") {
            let mut parts = stem.splitn(3, '-');
            if parts.next() != Some("message") {
                continue;
            }
            let (Some(res), Some(line)) = (parts.next(), parts.next()) else {
                continue;
            };
            let (Ok(res), Ok(line)) = (res.parse::<u16>(), line.parse::<u16>()) else {
                continue;
            };
            let text = fs::read_to_string(entry.path())
                .with_context(|| format!("reading {}", entry.path().display()))?;
            resources.insert_message(res, line, text.trim_end().to_string());
        }
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use caper_engine::context::ResourceStore;
    use tempfile::tempdir;

    #[test]
    fn resource_files_are_discovered_by_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sequence-42-0.bin"), b"\x01\x02").unwrap();
        fs::write(dir.path().join("strip-350-1.bin"), b"").unwrap();
        fs::write(dir.path().join("message-7-1.txt"), "HELLO THERE\n").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let resources = load_resources(dir.path()).unwrap();
        assert_eq!(
            resources.resource(ResourceKind::Sequence, 42, 0).unwrap(),
            vec![1, 2]
        );
        assert!(resources
            .resource(ResourceKind::Strip, 350, 1)
            .unwrap()
            .is_empty());
        assert_eq!(resources.message(7, 1).unwrap(), "HELLO THERE");
        assert!(resources.resource(ResourceKind::Sequence, 1, 0).is_err());
    }
}
