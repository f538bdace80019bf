use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex,
    },
};

#[cfg(test)]
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogColor {
    Red,
    Yellow,
}

/// How the host should present a plugin message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub verbose: bool,
    pub color: Option<LogColor>,
}

impl LogOptions {
    pub fn verbose() -> Self {
        LogOptions {
            verbose: true,
            color: None,
        }
    }

    pub fn error() -> Self {
        LogOptions {
            verbose: false,
            color: Some(LogColor::Red),
        }
    }

    pub fn warning() -> Self {
        LogOptions {
            verbose: true,
            color: Some(LogColor::Yellow),
        }
    }
}

/// Where plugin messages end up. Supplied by the host.
pub trait LogSink {
    fn log(&self, message: &str, options: LogOptions);
}

/// Forwards plugin messages to the `log` facade.
pub struct LogFacadeSink;

impl LogSink for LogFacadeSink {
    fn log(&self, message: &str, options: LogOptions) {
        match options.color {
            Some(LogColor::Red) => error!("{}", message),
            Some(LogColor::Yellow) => warn!("{}", message),
            _ if options.verbose => debug!("{}", message),
            _ => info!("{}", message),
        }
    }
}

#[derive(Clone)]
struct MutexVecDequeWrite {
    inner: Arc<Mutex<VecDeque<u8>>>,
    notify: Sender<()>,
}

impl Drop for MutexVecDequeWrite {
    fn drop(&mut self) {
        self.notify.send(()).ok();
    }
}

impl Write for MutexVecDequeWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_e| io::Error::other("Failed to lock mutex"))?
            .write(buf)
            .inspect(|_b| {
                self.notify.send(()).ok();
            })
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .lock()
            .map_err(|_e| io::Error::other("Failed to lock mutex"))?
            .flush()
    }
}

pub struct MutexVecDequeRead {
    inner: Arc<Mutex<VecDeque<u8>>>,
    notify: Receiver<()>,
}

impl MutexVecDequeRead {
    // Blocks until data is available or every writer is gone.
    fn wait_for_data(&mut self) -> io::Result<()> {
        loop {
            let is_empty = match self.inner.try_lock() {
                Ok(deque) => deque.is_empty(),
                Err(std::sync::TryLockError::Poisoned(_)) => {
                    return Err(io::Error::other("Mutex is poisoned"))
                }
                Err(std::sync::TryLockError::WouldBlock) => return Ok(()),
            };

            if !is_empty {
                return Ok(());
            }

            #[cfg(test)]
            match self.notify.recv_timeout(Duration::from_secs(3)) {
                Ok(_) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    panic!("Had to wait for too long for log data")
                }
                Err(_) => return Ok(()),
            }
            #[cfg(not(test))]
            if self.notify.recv().is_err() {
                return Ok(());
            }
        }
    }
}

impl Read for MutexVecDequeRead {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.wait_for_data()?;
        self.inner
            .lock()
            .map_err(|_e| io::Error::other("Failed to lock mutex"))?
            .read(buf)
    }
}

/// Writing half of a plugin log channel. Red messages go to the error
/// stream, everything else to the info stream, one line per message.
#[derive(Clone)]
pub struct MessageStream {
    inner_info: MutexVecDequeWrite,
    inner_error: MutexVecDequeWrite,
    verbose: bool,
}

impl MessageStream {
    pub fn info(&mut self) -> &mut dyn Write {
        &mut self.inner_info
    }

    pub fn error(&mut self) -> &mut dyn Write {
        &mut self.inner_error
    }
}

impl LogSink for MessageStream {
    fn log(&self, message: &str, options: LogOptions) {
        if options.verbose && !self.verbose {
            return;
        }
        let mut stream = match options.color {
            Some(LogColor::Red) => self.inner_error.clone(),
            _ => self.inner_info.clone(),
        };
        writeln!(stream, "{}", message)
            .inspect_err(|e| warn!("Could not write plugin message: {}", e))
            .ok();
    }
}

/// Reading half of a plugin log channel, held by the host.
pub struct PluginLogs {
    inner_info: MutexVecDequeRead,
    inner_error: MutexVecDequeRead,
}

#[allow(unused)]
impl PluginLogs {
    pub fn info(&mut self) -> &mut dyn Read {
        &mut self.inner_info
    }

    pub fn error(&mut self) -> &mut dyn Read {
        &mut self.inner_error
    }

    pub fn into_read(self) -> (MutexVecDequeRead, MutexVecDequeRead) {
        (self.inner_info, self.inner_error)
    }
}

fn vec_deque_channel() -> (MutexVecDequeWrite, MutexVecDequeRead) {
    let (s, r) = channel();
    let m: Arc<Mutex<VecDeque<u8>>> = Default::default();
    (
        MutexVecDequeWrite {
            inner: m.clone(),
            notify: s,
        },
        MutexVecDequeRead {
            inner: m,
            notify: r,
        },
    )
}

/// Opens a log channel. Verbose messages are kept only when `verbose` is set.
pub fn message_channel(verbose: bool) -> (MessageStream, PluginLogs) {
    let info = vec_deque_channel();
    let err = vec_deque_channel();

    (
        MessageStream {
            inner_info: info.0,
            inner_error: err.0,
            verbose,
        },
        PluginLogs {
            inner_info: info.1,
            inner_error: err.1,
        },
    )
}
