/// I/O interest for a watched descriptor.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    /// Readable only.
    pub const READABLE: Interest = Interest {
        read: true,
        write: false,
    };

    /// Writable only.
    pub const WRITABLE: Interest = Interest {
        read: false,
        write: true,
    };

    /// Readable and writable.
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}
