//! Test doubles: a scriptable stand-in for the encoder binary and an event
//! collector.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::core::event_bus::EventHandler;
use crate::core::events::{Event, EventType};
use crate::core::lock::lock_mutex;
use crate::process::encoder::EncoderConfig;

const SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
for a in "$@"; do
  if [ "$a" = "-version" ]; then
    echo "ffmpeg version 0.0-fake"
    exit 0
  fi
done

out=""
list=""
concat=0
capped=0
prev=""
for a in "$@"; do
  if [ "$prev" = "-f" ] && [ "$a" = "concat" ]; then concat=1; fi
  if [ "$prev" = "-i" ]; then list="$a"; fi
  if [ "$a" = "-t" ] || [ "$a" = "-vframes" ]; then capped=1; fi
  prev="$a"
  out="$a"
done

if [ "$concat" = "1" ]; then
  i=0
  while [ "$i" -lt @CONCAT_TICKS@ ]; do
    sleep 0.05
    i=$((i + 1))
  done
  if [ @CONCAT_EXIT@ -ne 0 ]; then exit @CONCAT_EXIT@; fi
  : > "$out"
  sed -n "s/^file '\(.*\)'\$/\1/p" "$list" | while IFS= read -r f; do
    cat "$f" >> "$out"
  done
  exit 0
fi

finish() {
  if [ @CREATE_OUTPUT@ = 1 ]; then
    printf '%s:%s\n' '@PAYLOAD@' "$(basename "$out")" > "$out"
  fi
  exit "$1"
}

@TRAP@

echo "frame=0 fps=0.0 q=0.0 size=0kB" >&2
i=0
while [ "$capped" = 0 ] || [ "$i" -lt @TICKS@ ]; do
  sleep 0.05
  i=$((i + 1))
  if [ @LIFETIME_TICKS@ -gt 0 ] && [ "$i" -ge @LIFETIME_TICKS@ ]; then break; fi
done
finish @EXIT_CODE@
"#;

/// Shell script mimicking the encoder's process contract.
///
/// Capture jobs write `<payload>:<output file name>\n` to the output (last
/// argument) when they finish or are interrupted. Capped jobs (`-t`,
/// `-vframes`) run for `ticks` x 50ms, open-ended ones until SIGINT or, if
/// `lifetime_ticks` is non-zero, until they give up on their own.
/// `-f concat` waits `concat_ticks` x 50ms, then appends the listed files in
/// order; `-version` prints a banner.
#[derive(Debug, Clone)]
pub struct FakeEncoder {
    pub exit_code: i32,
    pub concat_exit: i32,
    pub concat_ticks: u32,
    pub payload: String,
    pub create_output: bool,
    pub ticks: u32,
    pub honor_interrupt: bool,
    pub interrupt_exit: i32,
    pub lifetime_ticks: u32,
}

impl Default for FakeEncoder {
    fn default() -> Self {
        Self {
            exit_code: 0,
            concat_exit: 0,
            concat_ticks: 0,
            payload: "fake-frames".to_string(),
            create_output: true,
            ticks: 4,
            honor_interrupt: true,
            interrupt_exit: 0,
            lifetime_ticks: 0,
        }
    }
}

impl FakeEncoder {
    pub fn script(&self) -> String {
        let trap = if self.honor_interrupt {
            format!("trap 'finish {}' INT", self.interrupt_exit)
        } else {
            "trap '' INT".to_string()
        };

        SCRIPT_TEMPLATE
            .replace("@CONCAT_EXIT@", &self.concat_exit.to_string())
            .replace("@CONCAT_TICKS@", &self.concat_ticks.to_string())
            .replace("@LIFETIME_TICKS@", &self.lifetime_ticks.to_string())
            .replace("@CREATE_OUTPUT@", if self.create_output { "1" } else { "0" })
            .replace("@PAYLOAD@", &self.payload.replace('\'', ""))
            .replace("@TRAP@", &trap)
            .replace("@TICKS@", &self.ticks.to_string())
            .replace("@EXIT_CODE@", &self.exit_code.to_string())
    }

    /// Writes the script into `dir` and returns its path.
    pub fn install(&self, dir: &Path) -> io::Result<PathBuf> {
        let path = dir.join("fake-encoder.sh");
        std::fs::write(&path, self.script())?;
        Ok(path)
    }

    /// Encoder settings that run the installed script through `/bin/sh`.
    pub fn encoder_config(&self, dir: &Path, grace: Duration) -> io::Result<EncoderConfig> {
        let script = self.install(dir)?;
        Ok(EncoderConfig {
            program: "/bin/sh".to_string(),
            leading_args: vec![script.to_string_lossy().into_owned()],
            grace_ms: grace.as_millis() as u64,
            ..EncoderConfig::default()
        })
    }
}

/// Records every event it sees.
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<Event>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        lock_mutex(&self.events, "EventCollector::events").clone()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    /// Polls until an event of `event_type` arrives or `timeout` passes.
    pub fn wait_for(&self, event_type: EventType, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.of_type(event_type.clone()).into_iter().next() {
                return Some(event);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl EventHandler for EventCollector {
    fn handle_event(&self, event: &Event) -> Result<()> {
        lock_mutex(&self.events, "EventCollector::handle_event").push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "collector"
    }
}
