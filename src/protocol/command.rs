//! Command definitions
//!
//! A request as sent to the server: an ordered list of binary-safe arguments.

use std::fmt;

use bytes::Bytes;

/// Pub/sub control commands that only the subscription router may send
pub const PUBSUB_CONTROL: [&str; 4] = ["SUBSCRIBE", "UNSUBSCRIBE", "PSUBSCRIBE", "PUNSUBSCRIBE"];

/// A request: argument 0 is the command name
///
/// Built with a consuming builder and immutable afterwards.
///
/// ```
/// use redwire::protocol::Command;
///
/// let cmd = Command::new("SET").arg("key").arg(&b"\x00\x01"[..]).arg(42);
/// assert_eq!(cmd.len(), 4);
/// assert_eq!(cmd.name(), "SET");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Start a command with its name
    pub fn new(name: impl ToArg) -> Self {
        Self {
            args: vec![name.to_arg()],
        }
    }

    /// Build a command from a full argument list (name first)
    pub fn from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToArg,
    {
        Self {
            args: args.into_iter().map(|a| a.to_arg()).collect(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl ToArg) -> Self {
        self.args.push(arg.to_arg());
        self
    }

    /// Append several arguments
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: ToArg,
    {
        self.args.extend(args.into_iter().map(|a| a.to_arg()));
        self
    }

    /// All arguments, name included
    pub fn as_args(&self) -> &[Bytes] {
        &self.args
    }

    /// Command name, upper-cased for comparisons
    pub fn name(&self) -> String {
        self.args
            .first()
            .map(|n| String::from_utf8_lossy(n).to_ascii_uppercase())
            .unwrap_or_default()
    }

    /// Number of arguments including the name
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Whether this is one of the subscribe/unsubscribe control commands
    pub fn is_pubsub_control(&self) -> bool {
        let name = self.name();
        PUBSUB_CONTROL.contains(&name.as_str())
    }
}

// Credentials never reach the logs: every AUTH argument, and the password
// following `HELLO <ver> AUTH <user>`
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name();
        let hello_password = if name == "HELLO" {
            self.args
                .iter()
                .position(|a| a.eq_ignore_ascii_case(b"AUTH"))
                .map(|i| i + 2)
        } else {
            None
        };

        let mut list = f.debug_list();
        for (i, arg) in self.args.iter().enumerate() {
            let secret = (name == "AUTH" && i > 0) || Some(i) == hello_password;
            if secret {
                list.entry(&"<redacted>");
            } else {
                list.entry(&String::from_utf8_lossy(arg));
            }
        }
        list.finish()
    }
}

/// Conversion into a single wire argument
pub trait ToArg {
    fn to_arg(&self) -> Bytes;
}

impl ToArg for Bytes {
    fn to_arg(&self) -> Bytes {
        self.clone()
    }
}

impl ToArg for [u8] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for Vec<u8> {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl<const N: usize> ToArg for [u8; N] {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self)
    }
}

impl ToArg for str {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl ToArg for String {
    fn to_arg(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }
}

impl<T: ToArg + ?Sized> ToArg for &T {
    fn to_arg(&self) -> Bytes {
        (**self).to_arg()
    }
}

macro_rules! numeric_arg {
    ($($ty:ty),*) => {
        $(
            impl ToArg for $ty {
                fn to_arg(&self) -> Bytes {
                    Bytes::from(self.to_string())
                }
            }
        )*
    };
}

numeric_arg!(i32, i64, u32, u64, usize, f64);
