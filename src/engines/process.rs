//! Engines backed by external programs
//!
//! The recognizer speaks the streaming line protocol: raw 16-bit PCM on
//! stdin, one JSON object per line on stdout. Objects carrying `text` are
//! finished segments; anything else (e.g. `partial`) is progress and ignored.
//!
//! The synthesizer runs a TTS program once per reply and expects it to
//! write a WAV file to the path substituted for `{output}`.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::voice::{RecognitionEngine, SynthesisEngine};
use crate::{Error, Result};

/// Replace `{name}` placeholders in an argument template
///
/// Substituted values are never scanned again, so a reply containing
/// `{output}` stays as spoken text. Unknown placeholders are kept.
#[must_use]
pub fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    let mut expanded = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        expanded.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let known = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| (*value, close))
        });

        match known {
            Some((value, close)) => {
                expanded.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                expanded.push('{');
                rest = after;
            }
        }
    }

    expanded.push_str(rest);
    expanded
}

fn resolve_program(program: &str, what: &str) -> Result<PathBuf> {
    which::which(program)
        .map_err(|e| Error::Config(format!("{what} program '{program}' not found: {e}")))
}

/// Recognizer running an external streaming STT program
pub struct ProcessRecognizer {
    program: PathBuf,
    args: Vec<String>,
    model_dir: PathBuf,
    running: Option<Running>,
    finished: VecDeque<String>,
}

struct Running {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl ProcessRecognizer {
    /// Create a recognizer
    ///
    /// The model directory must exist and the program must be resolvable.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either is missing
    pub fn new(program: &str, args: Vec<String>, model_dir: &Path) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(Error::Config(format!(
                "recognition model not found: {}",
                model_dir.display()
            )));
        }
        let program = resolve_program(program, "recognizer")?;

        tracing::info!(
            program = %program.display(),
            model = %model_dir.display(),
            "recognizer ready"
        );

        Ok(Self {
            program,
            args,
            model_dir: model_dir.to_path_buf(),
            running: None,
            finished: VecDeque::new(),
        })
    }

    fn drain_ready(&mut self) {
        let Some(running) = self.running.as_ref() else {
            return;
        };
        while let Ok(line) = running.lines.try_recv() {
            if let Some(json) = final_segment(&line) {
                self.finished.push_back(json);
            }
        }
    }

    fn abort(&mut self) {
        if let Some(mut running) = self.running.take() {
            drop(running.stdin.take());
            let _ = running.child.kill();
            let _ = running.child.wait();
            if let Some(reader) = running.reader.take() {
                let _ = reader.join();
            }
        }
        self.finished.clear();
    }
}

/// Return the line if it is a finished segment
fn final_segment(line: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    value.get("text")?;
    Some(value.to_string())
}

impl RecognitionEngine for ProcessRecognizer {
    fn start(&mut self, sample_rate: u32) -> Result<()> {
        self.abort();

        let model = self.model_dir.display().to_string();
        let rate = sample_rate.to_string();
        let vars = [("model", model.as_str()), ("rate", rate.as_str())];
        let args: Vec<String> = self.args.iter().map(|a| expand(a, &vars)).collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::recognition_engine(format!("failed to start recognizer: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::recognition_engine("recognizer stdout unavailable"))?;
        let stdin = child.stdin.take();

        let (tx, rx) = mpsc::channel();
        let reader = std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        self.running = Some(Running {
            child,
            stdin,
            lines: rx,
            reader: Some(reader),
        });
        Ok(())
    }

    fn accept_waveform(&mut self, pcm: &[u8]) -> Result<bool> {
        let stdin = self
            .running
            .as_mut()
            .and_then(|r| r.stdin.as_mut())
            .ok_or_else(|| Error::recognition_engine("recognizer not started"))?;

        stdin
            .write_all(pcm)
            .map_err(|e| Error::recognition_engine(format!("recognizer rejected audio: {e}")))?;

        self.drain_ready();
        Ok(!self.finished.is_empty())
    }

    fn result(&mut self) -> Result<String> {
        Ok(self
            .finished
            .pop_front()
            .unwrap_or_else(|| r#"{"text": ""}"#.to_string()))
    }

    fn final_result(&mut self) -> Result<String> {
        let mut running = self
            .running
            .take()
            .ok_or_else(|| Error::recognition_engine("recognizer not started"))?;

        // Closing stdin ends the utterance
        drop(running.stdin.take());

        for line in running.lines.iter() {
            if let Some(json) = final_segment(&line) {
                self.finished.push_back(json);
            }
        }
        if let Some(reader) = running.reader.take() {
            let _ = reader.join();
        }

        let status = running
            .child
            .wait()
            .map_err(|e| Error::recognition_engine(e.to_string()))?;
        if !status.success() {
            self.finished.clear();
            return Err(Error::recognition_engine(format!(
                "recognizer exited with {status}"
            )));
        }

        let mut texts = Vec::new();
        for json in self.finished.drain(..) {
            let text = crate::voice::parse_result(&json)?;
            if !text.is_empty() {
                texts.push(text);
            }
        }

        Ok(serde_json::json!({ "text": texts.join(" ") }).to_string())
    }
}

impl Drop for ProcessRecognizer {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Synthesizer running an external TTS program
pub struct ProcessSynthesizer {
    program: PathBuf,
    args: Vec<String>,
    voice_args: Vec<String>,
    rate: u32,
    volume: f32,
    voice: Option<String>,
}

impl ProcessSynthesizer {
    /// Create a synthesizer
    ///
    /// `rate` is in words per minute, `volume` in 0.0..=1.0.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the program cannot be resolved
    pub fn new(
        program: &str,
        args: Vec<String>,
        voice_args: Vec<String>,
        rate: u32,
        volume: f32,
        voice: Option<String>,
    ) -> Result<Self> {
        let program = resolve_program(program, "synthesizer")?;

        tracing::info!(
            program = %program.display(),
            rate,
            volume,
            voice = voice.as_deref().unwrap_or("default"),
            "synthesizer ready"
        );

        Ok(Self {
            program,
            args,
            voice_args,
            rate,
            volume: volume.clamp(0.0, 1.0),
            voice,
        })
    }

    fn command_args(&self, text: &str, target: &Path) -> Vec<String> {
        let output = target.display().to_string();
        let rate = self.rate.to_string();
        let volume = format!("{:.2}", self.volume);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let amplitude = ((self.volume * 100.0).round() as u32).to_string();
        let voice = self.voice.clone().unwrap_or_default();

        let vars = [
            ("text", text),
            ("output", output.as_str()),
            ("rate", rate.as_str()),
            ("volume", volume.as_str()),
            ("amplitude", amplitude.as_str()),
            ("voice", voice.as_str()),
        ];

        let voice_args: &[String] = if self.voice.is_some() {
            self.voice_args.as_slice()
        } else {
            &[]
        };

        voice_args
            .iter()
            .chain(self.args.iter())
            .map(|a| expand(a, &vars))
            .collect()
    }
}

impl SynthesisEngine for ProcessSynthesizer {
    fn render(&mut self, text: &str, target: &Path) -> Result<()> {
        let args = self.command_args(text, target);
        let text_on_stdin = !self.args.iter().any(|a| a.contains("{text}"));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if text_on_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::synthesis_engine(format!("failed to start synthesizer: {e}")))?;

        if text_on_stdin
            && let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(text.as_bytes())
        {
            drop(stdin);
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::synthesis_engine(format!(
                "failed to send text to synthesizer: {e}"
            )));
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::synthesis_engine(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::synthesis_engine(format!(
                "synthesizer exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
