// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Negotiated shared memory for bitmap upload and text blocks.
//!
//! Bitmaps: `prepare(id)`, share-out with the same id, decode or draw, `drop`.
//! Text: share-out with id 0, then draw-text-block as often as needed.

use nexus_abi::{AreaFlags, Errno, Sysarg};
use nexus_ipc::SharedArea;

/// Bytes per text cell: character, foreground and background as little-endian `u32`.
pub const TEXT_CELL_BYTES: usize = 12;

/// Identifier reserved for the text area.
pub const TEXT_AREA_ID: Sysarg = 0;

/// Bitmap negotiation state.
#[derive(Debug, Clone, Default)]
pub enum ShmState {
    /// Nothing negotiated.
    #[default]
    Unprepared,
    /// The client announced an area id; no area mapped yet.
    Prepared {
        /// Announced identifier.
        id: Sysarg,
    },
    /// A validated area is mapped.
    Mapped {
        /// Announced identifier.
        id: Sysarg,
        /// The mapping.
        area: SharedArea,
    },
}

impl ShmState {
    fn id(&self) -> Option<Sysarg> {
        match self {
            Self::Unprepared => None,
            Self::Prepared { id } | Self::Mapped { id, .. } => Some(*id),
        }
    }
}

/// One cell of a text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCell {
    /// Character code.
    pub character: u32,
    /// Foreground colour.
    pub fg: u32,
    /// Background colour.
    pub bg: u32,
}

impl TextCell {
    /// Decodes one cell from its wire layout.
    pub fn decode(raw: &[u8; TEXT_CELL_BYTES]) -> Self {
        let word = |i: usize| u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
        Self { character: word(0), fg: word(4), bg: word(8) }
    }

    /// Encodes the cell into its wire layout.
    pub fn encode(&self) -> [u8; TEXT_CELL_BYTES] {
        let mut raw = [0u8; TEXT_CELL_BYTES];
        raw[..4].copy_from_slice(&self.character.to_le_bytes());
        raw[4..8].copy_from_slice(&self.fg.to_le_bytes());
        raw[8..].copy_from_slice(&self.bg.to_le_bytes());
        raw
    }

    /// Glyph index; characters beyond Latin-1 show as `?`.
    pub fn glyph(&self) -> u8 {
        u8::try_from(self.character).unwrap_or(b'?')
    }
}

/// Shared memory held on behalf of the active client.
#[derive(Debug, Default)]
pub struct SharedMemory {
    state: ShmState,
    text: Option<SharedArea>,
}

impl SharedMemory {
    /// Creates an empty negotiation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current bitmap negotiation state.
    pub fn state(&self) -> &ShmState {
        &self.state
    }

    /// Announces the id of the area about to be shared.
    pub fn prepare(&mut self, id: Sysarg) -> Result<(), Errno> {
        if id == TEXT_AREA_ID {
            return Err(Errno::InvalidArgument);
        }
        match self.state.id() {
            Some(current) if current == id => Ok(()),
            Some(_) => Err(Errno::Busy),
            None => {
                self.state = ShmState::Prepared { id };
                Ok(())
            }
        }
    }

    /// Handles a share-out carrying `id`. Id 0 installs the text area.
    pub fn offer(&mut self, id: Sysarg, area: Option<SharedArea>) -> Result<(), Errno> {
        if id == TEXT_AREA_ID {
            let area = area.ok_or(Errno::InvalidArgument)?;
            if !area.flags().contains(AreaFlags::READ) {
                return Err(Errno::InvalidArgument);
            }
            self.text = Some(area);
            return Ok(());
        }
        if self.state.id() != Some(id) {
            log::warn!("fbd: share-out id {id} does not match prepared area");
            return Err(Errno::InvalidArgument);
        }
        let valid = area.filter(|area| area.flags().contains(AreaFlags::READ) && area.read().first() == Some(&b'P'));
        match valid {
            Some(area) => {
                self.state = ShmState::Mapped { id, area };
                Ok(())
            }
            None => {
                self.state = ShmState::Unprepared;
                Err(Errno::InvalidData)
            }
        }
    }

    /// The mapped bitmap area.
    pub fn mapped(&self) -> Result<&SharedArea, Errno> {
        match &self.state {
            ShmState::Mapped { area, .. } => Ok(area),
            _ => Err(Errno::InvalidArgument),
        }
    }

    /// Unmaps the bitmap area and forgets the prepared id.
    pub fn drop_shared(&mut self) {
        self.state = ShmState::Unprepared;
    }

    /// Returns `true` when a text area is installed.
    pub fn has_text(&self) -> bool {
        self.text.is_some()
    }

    /// Decodes the first `count` cells of the text area.
    pub fn text_cells(&self, count: usize) -> Result<Vec<TextCell>, Errno> {
        let area = self.text.as_ref().ok_or(Errno::InvalidArgument)?;
        let bytes = area.read();
        if bytes.len() < count * TEXT_CELL_BYTES {
            return Err(Errno::InvalidArgument);
        }
        Ok(bytes
            .chunks_exact(TEXT_CELL_BYTES)
            .take(count)
            .filter_map(|chunk| <&[u8; TEXT_CELL_BYTES]>::try_from(chunk).ok())
            .map(TextCell::decode)
            .collect())
    }

    /// Releases every area.
    pub fn reset(&mut self) {
        self.state = ShmState::Unprepared;
        self.text = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ppm_area() -> SharedArea {
        SharedArea::from_bytes(b"P6 1 1 255\n\0\0\0".to_vec(), AreaFlags::READ)
    }

    #[test]
    fn prepare_rules() {
        let mut shm = SharedMemory::new();
        assert_eq!(shm.prepare(0), Err(Errno::InvalidArgument));
        shm.prepare(7).unwrap();
        shm.prepare(7).unwrap();
        assert_eq!(shm.prepare(8), Err(Errno::Busy));
        shm.offer(7, Some(ppm_area())).unwrap();
        assert_eq!(shm.prepare(8), Err(Errno::Busy));
        shm.drop_shared();
        shm.prepare(8).unwrap();
    }

    #[test]
    fn mismatched_offer_leaves_state_alone() {
        let mut shm = SharedMemory::new();
        assert_eq!(shm.offer(5, Some(ppm_area())), Err(Errno::InvalidArgument));
        shm.prepare(7).unwrap();
        assert_eq!(shm.offer(5, Some(ppm_area())), Err(Errno::InvalidArgument));
        assert!(matches!(shm.state(), ShmState::Prepared { id: 7 }));
        assert_eq!(shm.mapped().err(), Some(Errno::InvalidArgument));
    }

    #[test]
    fn invalid_area_unwinds() {
        let mut shm = SharedMemory::new();
        shm.prepare(7).unwrap();
        let junk = SharedArea::from_bytes(b"GIF89a".to_vec(), AreaFlags::READ);
        assert_eq!(shm.offer(7, Some(junk)), Err(Errno::InvalidData));
        assert!(matches!(shm.state(), ShmState::Unprepared));

        shm.prepare(7).unwrap();
        let unreadable = SharedArea::from_bytes(b"P6".to_vec(), AreaFlags::WRITE);
        assert_eq!(shm.offer(7, Some(unreadable)), Err(Errno::InvalidData));
        assert!(matches!(shm.state(), ShmState::Unprepared));
    }

    #[test]
    fn text_area_cells() {
        let mut shm = SharedMemory::new();
        assert_eq!(shm.text_cells(1).err(), Some(Errno::InvalidArgument));
        let cells = [TextCell { character: 'h' as u32, fg: 1, bg: 2 }, TextCell { character: 0x263a, fg: 0, bg: 0 }];
        let bytes: Vec<u8> = cells.iter().flat_map(|cell| cell.encode()).collect();
        shm.offer(TEXT_AREA_ID, Some(SharedArea::from_bytes(bytes, AreaFlags::READ))).unwrap();
        let decoded = shm.text_cells(2).unwrap();
        assert_eq!(decoded, cells);
        assert_eq!(decoded[0].glyph(), b'h');
        assert_eq!(decoded[1].glyph(), b'?');
        assert_eq!(shm.text_cells(3).err(), Some(Errno::InvalidArgument));
        shm.reset();
        assert!(!shm.has_text());
    }
}
