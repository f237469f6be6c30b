//! External-memory shuffling: chunk the input into memory-sized pieces,
//! sort each chunk by an independent random key, spill it to a temp file,
//! then k-way merge the sorted chunks back into one fully shuffled stream.
//!
//! Grounded in the original implementation's chunk-sort-and-merge approach,
//! reworked onto `std::thread` + a bounded `mpsc` channel instead of worker
//! processes, and `std::thread::scope` instead of manual join bookkeeping.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;

use rand::Rng;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::rng::SplitMix64;

#[derive(Debug, Error)]
pub enum ShuffleError {
    #[error("shuffle I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no gzip-compatible decompressor (pigz or gzip) found on PATH")]
    NoGzipBinary,
    #[error("`{command}` exited with status {code:?} while decompressing {path}")]
    GzipFailed {
        command: String,
        path: String,
        code: Option<i32>,
    },
    #[error("shuffle cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ShuffleOptions {
    pub chunk_size: usize,
    pub workers: usize,
    pub tmp_dir: Option<PathBuf>,
    pub shuffle: bool,
}

impl Default for ShuffleOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000_000,
            workers: 0,
            tmp_dir: None,
            shuffle: true,
        }
    }
}

/// Materializes the (optionally shuffled) concatenation of `files` into
/// `out`, seeded by `seed`. `cancel` is polled between chunks so a caller
/// (the async reader) can abort an in-flight shuffle it no longer needs.
pub fn materialize(
    files: &[PathBuf],
    seed: u64,
    opts: &ShuffleOptions,
    cancel: &AtomicBool,
    out: &mut File,
) -> Result<(), ShuffleError> {
    let lines = ChainedLines::new(files.to_vec());

    if !opts.shuffle {
        let mut writer = BufWriter::new(out);
        for line in lines {
            if cancel.load(Ordering::Relaxed) {
                return Err(ShuffleError::Cancelled);
            }
            writer.write_all(&line?)?;
        }
        writer.flush()?;
        return Ok(());
    }

    let chunk_files = external_sort(lines, seed, opts.chunk_size, opts.workers, opts.tmp_dir.as_deref(), cancel)?;
    let mut writer = BufWriter::new(out);
    for line in k_way_merge(&chunk_files)? {
        writer.write_all(&line?)?;
    }
    writer.flush()?;
    // chunk_files drop here, deleting the temp files.
    Ok(())
}

fn external_sort(
    mut lines: impl Iterator<Item = io::Result<Vec<u8>>>,
    seed: u64,
    chunk_size: usize,
    workers: usize,
    tmp_dir: Option<&Path>,
    cancel: &AtomicBool,
) -> Result<Vec<NamedTempFile>, ShuffleError> {
    let mut rng = SplitMix64::new(seed);
    let mut chunk_files = Vec::new();

    let read_chunk = |lines: &mut dyn Iterator<Item = io::Result<Vec<u8>>>,
                       rng: &mut SplitMix64|
     -> Result<Vec<(f32, Vec<u8>)>, ShuffleError> {
        let mut chunk = Vec::with_capacity(chunk_size.min(1 << 16));
        for _ in 0..chunk_size {
            match lines.next() {
                Some(Ok(line)) => chunk.push((rng.gen::<f32>(), line)),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        Ok(chunk)
    };

    if workers == 0 {
        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(ShuffleError::Cancelled);
            }
            let chunk = read_chunk(&mut lines, &mut rng)?;
            if chunk.is_empty() {
                break;
            }
            chunk_files.push(sort_and_spill(chunk, tmp_dir)?);
        }
        return Ok(chunk_files);
    }

    thread::scope(|scope| -> Result<(), ShuffleError> {
        let (task_tx, task_rx) = mpsc::sync_channel::<Vec<(f32, Vec<u8>)>>(workers);
        let task_rx = Mutex::new(task_rx);
        let (result_tx, result_rx) = mpsc::channel::<Result<NamedTempFile, ShuffleError>>();

        for _ in 0..workers {
            let result_tx = result_tx.clone();
            let task_rx = &task_rx;
            scope.spawn(move || {
                loop {
                    let chunk = {
                        let rx = task_rx.lock().unwrap_or_else(|p| p.into_inner());
                        rx.recv()
                    };
                    match chunk {
                        Ok(chunk) => {
                            if result_tx.send(sort_and_spill(chunk, tmp_dir)).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }
        drop(result_tx);

        let mut num_chunks = 0usize;
        let mut submit_error = None;
        loop {
            if cancel.load(Ordering::Relaxed) {
                submit_error = Some(ShuffleError::Cancelled);
                break;
            }
            let chunk = match read_chunk(&mut lines, &mut rng) {
                Ok(chunk) => chunk,
                Err(e) => {
                    submit_error = Some(e);
                    break;
                }
            };
            if chunk.is_empty() {
                break;
            }
            num_chunks += 1;
            if task_tx.send(chunk).is_err() {
                break;
            }
        }
        drop(task_tx);

        for _ in 0..num_chunks {
            match result_rx.recv() {
                Ok(Ok(file)) => chunk_files.push(file),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }

        if let Some(e) = submit_error {
            return Err(e);
        }
        Ok(())
    })?;

    Ok(chunk_files)
}

fn sort_and_spill(mut chunk: Vec<(f32, Vec<u8>)>, tmp_dir: Option<&Path>) -> Result<NamedTempFile, ShuffleError> {
    chunk.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut file = match tmp_dir {
        Some(dir) => tempfile::Builder::new().prefix("datafeeder-chunk-").tempfile_in(dir)?,
        None => tempfile::Builder::new().prefix("datafeeder-chunk-").tempfile()?,
    };
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        for (r, line) in &chunk {
            writer.write_all(&r.to_ne_bytes())?;
            writer.write_all(&(line.len() as u32).to_ne_bytes())?;
            writer.write_all(line)?;
        }
        writer.flush()?;
    }
    Ok(file)
}

struct ChunkFileReader {
    reader: BufReader<File>,
}

impl ChunkFileReader {
    fn open(file: &NamedTempFile) -> io::Result<Self> {
        let mut file = file.reopen()?;
        file.rewind()?;
        Ok(Self {
            reader: BufReader::new(file),
        })
    }
}

impl Iterator for ChunkFileReader {
    type Item = io::Result<(f32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut header = [0u8; 8];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e)),
        }
        let r = f32::from_ne_bytes(header[0..4].try_into().unwrap());
        let len = u32::from_ne_bytes(header[4..8].try_into().unwrap()) as usize;
        let mut buf = vec![0u8; len];
        if let Err(e) = self.reader.read_exact(&mut buf) {
            return Some(Err(e));
        }
        Some(Ok((r, buf)))
    }
}

struct HeapEntry {
    key: f32,
    reader_index: usize,
    line: Vec<u8>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so `BinaryHeap` (a max-heap) pops the smallest key first.
        other.key.total_cmp(&self.key)
    }
}

fn k_way_merge(chunk_files: &[NamedTempFile]) -> Result<impl Iterator<Item = io::Result<Vec<u8>>>, ShuffleError> {
    use std::collections::BinaryHeap;

    let mut readers: Vec<ChunkFileReader> = chunk_files
        .iter()
        .map(ChunkFileReader::open)
        .collect::<io::Result<_>>()?;

    let mut heap = BinaryHeap::with_capacity(readers.len());
    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some(item) = reader.next() {
            let (key, line) = item?;
            heap.push(HeapEntry {
                key,
                reader_index: i,
                line,
            });
        }
    }

    Ok(std::iter::from_fn(move || {
        let entry = heap.pop()?;
        if let Some(item) = readers[entry.reader_index].next() {
            match item {
                Ok((key, line)) => heap.push(HeapEntry {
                    key,
                    reader_index: entry.reader_index,
                    line,
                }),
                Err(e) => return Some(Err(e)),
            }
        }
        Some(Ok(entry.line))
    }))
}

/// Lazily reads a sequence of files as raw lines (including the trailing
/// newline), transparently decompressing any file ending in `.gz` through
/// an external `pigz`/`gzip` process.
pub struct ChainedLines {
    remaining: std::collections::VecDeque<PathBuf>,
    current: Option<Source>,
}

enum Source {
    Plain(BufReader<File>),
    Gzip {
        reader: BufReader<std::process::ChildStdout>,
        child: Child,
        path: String,
    },
}

impl ChainedLines {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            remaining: files.into(),
            current: None,
        }
    }

    fn advance(&mut self) -> io::Result<bool> {
        match self.remaining.pop_front() {
            Some(path) => {
                self.current = Some(open_source(&path)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Iterator for ChainedLines {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                match self.advance() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }

            let mut buf = Vec::new();
            let read = match self.current.as_mut().unwrap() {
                Source::Plain(reader) => reader.read_until(b'\n', &mut buf),
                Source::Gzip { reader, .. } => reader.read_until(b'\n', &mut buf),
            };
            match read {
                Ok(0) => {
                    if let Err(e) = finalize(self.current.take().unwrap()) {
                        return Some(Err(e));
                    }
                    continue;
                }
                Ok(_) => return Some(Ok(buf)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn finalize(source: Source) -> io::Result<()> {
    match source {
        Source::Plain(_) => Ok(()),
        Source::Gzip { mut child, path, .. } => {
            let status = child.wait()?;
            if !status.success() {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("gzip decompression of {path} failed with status {status}"),
                ));
            }
            Ok(())
        }
    }
}

fn open_source(path: &Path) -> io::Result<Source> {
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        let binary = find_gzip_binary().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no gzip-compatible decompressor found on PATH")
        })?;
        let mut child = Command::new(&binary)
            .arg("-cd")
            .arg(path)
            .stdout(Stdio::piped())
            .spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        Ok(Source::Gzip {
            reader: BufReader::new(stdout),
            child,
            path: path.display().to_string(),
        })
    } else {
        Ok(Source::Plain(BufReader::new(File::open(path)?)))
    }
}

fn find_gzip_binary() -> Option<PathBuf> {
    find_on_path("pigz").or_else(|| find_on_path("gzip"))
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        candidate.is_file().then_some(candidate)
    })
}
