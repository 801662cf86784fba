use serde::{Deserialize, Serialize};

use weft_core::hash::{AddressHash, Hash};

use crate::error::StoreError;
use crate::fs::FileSystem;
use crate::message::{LxMessage, MessageState};

const INDEX_PATH: &str = "/conv.json";
const MESSAGE_DIR: &str = "/m";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_conversations: usize,
    pub max_messages_per_conversation: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_conversations: 32, max_messages_per_conversation: 128 }
    }
}

/// Chat-list fields readable without unpacking the wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMetadata {
    pub hash: Hash,
    pub content: String,
    pub timestamp: f64,
    pub incoming: bool,
    pub state: MessageState,
}

#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub peer_hash: AddressHash,
    pub message_hashes: Vec<Hash>,
    pub last_activity: f64,
    pub unread_count: u32,
    pub last_message_hash: Option<Hash>,
}

struct ConversationSlot {
    in_use: bool,
    peer_hash: AddressHash,
    message_hashes: Vec<Hash>,
    last_activity: f64,
    unread_count: u32,
    last_message_hash: Option<Hash>,
}

impl ConversationSlot {
    fn empty() -> Self {
        Self {
            in_use: false,
            peer_hash: AddressHash::zero(),
            message_hashes: Vec::new(),
            last_activity: 0.0,
            unread_count: 0,
            last_message_hash: None,
        }
    }

    fn clear(&mut self) {
        *self = Self::empty();
    }
}

// On-disk JSON shapes

#[derive(Serialize, Deserialize, Default)]
struct IndexFile {
    conversations: Vec<IndexConversation>,
}

#[derive(Serialize, Deserialize)]
struct IndexConversation {
    peer_hash: String,
    messages: Vec<String>,
    last_activity: f64,
    unread_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message_hash: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct MessageFile {
    hash: String,
    destination_hash: String,
    source_hash: String,
    incoming: bool,
    timestamp: f64,
    state: u8,
    content: String,
    packed: String,
}

/// Conversation-indexed message persistence: a fixed pool of conversation
/// slots, one JSON index, and one JSON file per message. The index is
/// rewritten after every structural change.
pub struct MessageStore<F: FileSystem> {
    fs: F,
    config: StoreConfig,
    slots: Vec<ConversationSlot>,
}

impl<F: FileSystem> MessageStore<F> {
    pub fn open(fs: F, config: StoreConfig) -> Self {
        if let Err(err) = fs.create_directory(MESSAGE_DIR) {
            log::warn!("store: could not create message directory: {}", err);
        }

        let slots = (0..config.max_conversations).map(|_| ConversationSlot::empty()).collect();
        let mut store = Self { fs, config, slots };
        store.load_index();

        log::info!("store: opened with {} conversations", store.conversation_count());
        store
    }

    fn message_path(hash: &Hash) -> String {
        format!("{}/{}.j", MESSAGE_DIR, &hash.to_hex()[..12])
    }

    /// Persists the message file and threads it into its conversation.
    pub fn save_message(&mut self, message: &LxMessage) -> Result<(), StoreError> {
        let file = MessageFile {
            hash: message.hash.to_hex(),
            destination_hash: message.destination.to_hex(),
            source_hash: message.source.to_hex(),
            incoming: message.incoming,
            timestamp: message.timestamp,
            state: message.state as u8,
            content: message.content.clone(),
            packed: hex::encode(message.packed()),
        };

        let encoded = serde_json::to_vec_pretty(&file)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        self.fs.write_file(&Self::message_path(&message.hash), &encoded)?;

        let peer_hash = message.peer_hash();
        let max_messages = self.config.max_messages_per_conversation;

        let Some(slot) = self.find_or_allocate(peer_hash) else {
            log::warn!("store: conversation pool full, rejecting save for {}", peer_hash);
            return Err(StoreError::ConversationPoolFull);
        };

        if !slot.message_hashes.contains(&message.hash) {
            if slot.message_hashes.len() >= max_messages {
                log::warn!("store: message pool full for conversation {}", peer_hash);
                return Err(StoreError::MessagePoolFull);
            }

            slot.message_hashes.push(message.hash);
            slot.last_activity = message.timestamp;
            slot.last_message_hash = Some(message.hash);
            if message.incoming {
                slot.unread_count += 1;
            }
        }

        self.save_index()
    }

    /// Reloads a message from its packed wire form. Direction and state
    /// come from the surrounding JSON; the signature was validated on
    /// receipt and is not re-checked.
    pub fn load_message(&self, hash: &Hash) -> Result<LxMessage, StoreError> {
        let file = self.read_message_file(hash)?;

        let packed =
            hex::decode(&file.packed).map_err(|err| StoreError::Decode(err.to_string()))?;
        let mut message = LxMessage::unpack_from_bytes(&packed)?;
        message.incoming = file.incoming;
        message.state = MessageState::from_u8(file.state);

        Ok(message)
    }

    /// Fast path for list rendering: no wire decode.
    pub fn load_message_metadata(&self, hash: &Hash) -> Result<MessageMetadata, StoreError> {
        let file = self.read_message_file(hash)?;

        Ok(MessageMetadata {
            hash: *hash,
            content: file.content,
            timestamp: file.timestamp,
            incoming: file.incoming,
            state: MessageState::from_u8(file.state),
        })
    }

    pub fn update_message_state(
        &mut self,
        hash: &Hash,
        state: MessageState,
    ) -> Result<(), StoreError> {
        let mut file = self.read_message_file(hash)?;
        file.state = state as u8;

        let encoded =
            serde_json::to_vec(&file).map_err(|err| StoreError::Encode(err.to_string()))?;
        self.fs.write_file(&Self::message_path(hash), &encoded)?;
        Ok(())
    }

    /// Removes the message file and unthreads the hash, repointing the
    /// conversation's last message at the previous entry.
    pub fn delete_message(&mut self, hash: &Hash) -> Result<(), StoreError> {
        let path = Self::message_path(hash);
        if self.fs.file_exists(&path) {
            self.fs.remove_file(&path)?;
        }

        for slot in self.slots.iter_mut().filter(|slot| slot.in_use) {
            if let Some(position) = slot.message_hashes.iter().position(|entry| entry == hash) {
                slot.message_hashes.remove(position);
                if slot.last_message_hash.as_ref() == Some(hash) {
                    slot.last_message_hash = slot.message_hashes.last().copied();
                }
                break;
            }
        }

        self.save_index()
    }

    pub fn delete_conversation(&mut self, peer_hash: &AddressHash) -> Result<(), StoreError> {
        let Some(slot) =
            self.slots.iter_mut().find(|slot| slot.in_use && slot.peer_hash == *peer_hash)
        else {
            return Err(StoreError::NotFound);
        };

        let hashes = std::mem::take(&mut slot.message_hashes);
        slot.clear();

        for hash in &hashes {
            let path = Self::message_path(hash);
            if self.fs.file_exists(&path) {
                if let Err(err) = self.fs.remove_file(&path) {
                    log::warn!("store: could not remove {}: {}", path, err);
                }
            }
        }

        log::info!("store: deleted conversation {} ({} messages)", peer_hash, hashes.len());
        self.save_index()
    }

    pub fn mark_conversation_read(&mut self, peer_hash: &AddressHash) -> Result<(), StoreError> {
        if let Some(slot) =
            self.slots.iter_mut().find(|slot| slot.in_use && slot.peer_hash == *peer_hash)
        {
            slot.unread_count = 0;
            self.save_index()?;
        }
        Ok(())
    }

    /// Peer hashes ordered by most recent activity first.
    pub fn get_conversations(&self) -> Vec<AddressHash> {
        let mut active: Vec<(&ConversationSlot, AddressHash)> = self
            .slots
            .iter()
            .filter(|slot| slot.in_use)
            .map(|slot| (slot, slot.peer_hash))
            .collect();
        active.sort_by(|a, b| {
            b.0.last_activity.partial_cmp(&a.0.last_activity).unwrap_or(std::cmp::Ordering::Equal)
        });
        active.into_iter().map(|(_, peer)| peer).collect()
    }

    pub fn get_conversation_info(&self, peer_hash: &AddressHash) -> Option<ConversationInfo> {
        self.slots.iter().find(|slot| slot.in_use && slot.peer_hash == *peer_hash).map(|slot| {
            ConversationInfo {
                peer_hash: slot.peer_hash,
                message_hashes: slot.message_hashes.clone(),
                last_activity: slot.last_activity,
                unread_count: slot.unread_count,
                last_message_hash: slot.last_message_hash,
            }
        })
    }

    /// Message hashes in save order (oldest first).
    pub fn get_messages_for_conversation(&self, peer_hash: &AddressHash) -> Vec<Hash> {
        self.slots
            .iter()
            .find(|slot| slot.in_use && slot.peer_hash == *peer_hash)
            .map(|slot| slot.message_hashes.clone())
            .unwrap_or_default()
    }

    pub fn unread_count(&self, peer_hash: &AddressHash) -> u32 {
        self.slots
            .iter()
            .find(|slot| slot.in_use && slot.peer_hash == *peer_hash)
            .map(|slot| slot.unread_count)
            .unwrap_or(0)
    }

    pub fn total_unread(&self) -> u32 {
        self.slots.iter().filter(|slot| slot.in_use).map(|slot| slot.unread_count).sum()
    }

    pub fn conversation_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }

    pub fn message_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).map(|slot| slot.message_hashes.len()).sum()
    }

    /// Removes every message and conversation.
    pub fn clear_all(&mut self) -> Result<(), StoreError> {
        for slot in self.slots.iter_mut().filter(|slot| slot.in_use) {
            for hash in std::mem::take(&mut slot.message_hashes) {
                let path = Self::message_path(&hash);
                if self.fs.file_exists(&path) {
                    let _ = self.fs.remove_file(&path);
                }
            }
            slot.clear();
        }
        self.save_index()
    }

    fn read_message_file(&self, hash: &Hash) -> Result<MessageFile, StoreError> {
        let path = Self::message_path(hash);
        if !self.fs.file_exists(&path) {
            return Err(StoreError::NotFound);
        }

        let data = self.fs.read_file(&path)?;
        serde_json::from_slice(&data).map_err(|err| StoreError::Decode(err.to_string()))
    }

    fn find_or_allocate(&mut self, peer_hash: AddressHash) -> Option<&mut ConversationSlot> {
        let position = self
            .slots
            .iter()
            .position(|slot| slot.in_use && slot.peer_hash == peer_hash)
            .or_else(|| {
                let free = self.slots.iter().position(|slot| !slot.in_use)?;
                let slot = &mut self.slots[free];
                slot.in_use = true;
                slot.peer_hash = peer_hash;
                log::debug!("store: new conversation with {}", peer_hash);
                Some(free)
            })?;

        Some(&mut self.slots[position])
    }

    fn load_index(&mut self) {
        if !self.fs.file_exists(INDEX_PATH) {
            log::debug!("store: no existing conversation index");
            return;
        }

        let data = match self.fs.read_file(INDEX_PATH) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("store: could not read index: {}", err);
                return;
            }
        };

        let index: IndexFile = match serde_json::from_slice(&data) {
            Ok(index) => index,
            Err(err) => {
                log::error!("store: corrupt conversation index: {}", err);
                return;
            }
        };

        for (slot, conversation) in self.slots.iter_mut().zip(index.conversations.iter()) {
            let Ok(peer_hash) = AddressHash::from_hex(&conversation.peer_hash) else {
                log::warn!("store: skipping conversation with bad peer hash");
                continue;
            };

            slot.in_use = true;
            slot.peer_hash = peer_hash;
            slot.last_activity = conversation.last_activity;
            slot.unread_count = conversation.unread_count;
            slot.last_message_hash = conversation
                .last_message_hash
                .as_deref()
                .and_then(|hex_hash| Hash::from_hex(hex_hash).ok());

            slot.message_hashes = conversation
                .messages
                .iter()
                .take(self.config.max_messages_per_conversation)
                .filter_map(|hex_hash| Hash::from_hex(hex_hash).ok())
                .collect();
        }

        if index.conversations.len() > self.slots.len() {
            log::warn!(
                "store: index holds {} conversations, pool keeps {}",
                index.conversations.len(),
                self.slots.len()
            );
        }
    }

    fn save_index(&mut self) -> Result<(), StoreError> {
        let index = IndexFile {
            conversations: self
                .slots
                .iter()
                .filter(|slot| slot.in_use)
                .map(|slot| IndexConversation {
                    peer_hash: slot.peer_hash.to_hex(),
                    messages: slot.message_hashes.iter().map(Hash::to_hex).collect(),
                    last_activity: slot.last_activity,
                    unread_count: slot.unread_count,
                    last_message_hash: slot.last_message_hash.as_ref().map(Hash::to_hex),
                })
                .collect(),
        };

        let encoded = serde_json::to_vec_pretty(&index)
            .map_err(|err| StoreError::Encode(err.to_string()))?;
        self.fs.write_file(INDEX_PATH, &encoded)?;
        Ok(())
    }
}
