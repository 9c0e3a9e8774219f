//! Contract, method and event names used by the pipeline.

use alloy_primitives::U256;

pub const LINK_TOKEN: &str = "LinkToken";
pub const VRF_COORDINATOR_MOCK: &str = "VRFCoordinatorMock";
pub const PIXEL_PACK_FACTORY: &str = "PixelPackFactory";

pub mod link_token {
    pub const TRANSFER: &str = "transfer";
    pub const BALANCE_OF: &str = "balanceOf";
    pub const TRANSFER_EVENT: &str = "Transfer";
}

pub mod vrf_coordinator {
    pub const CALLBACK_WITH_RANDOMNESS: &str = "callBackWithRandomness";
    /// `RandomnessRequest(bytes32 keyHash, uint256 fee, bytes32 requestId, address sender)`
    pub const REQUEST_EVENT: &str = "RandomnessRequest";
    /// `RandomnessRequestFulfilled(bytes32 requestId, uint256 output)`
    pub const FULFILLED_EVENT: &str = "RandomnessRequestFulfilled";
}

pub mod pixel_pack_factory {
    pub const GENERATE: &str = "generatePixelPack";
    pub const FINISH_MINT: &str = "finishMint";
    pub const TOKEN_URI: &str = "tokenURI";
    pub const REQUEST_ID_OF: &str = "requestIdOf";
    /// `PixelPackRequested(bytes32 indexed requestId, uint256 indexed tokenId)`
    pub const REQUESTED_EVENT: &str = "PixelPackRequested";
    pub const MINTED_EVENT: &str = "PixelPackMinted";
    pub const TRANSFER_EVENT: &str = "Transfer";
}

/// Event field names.
pub mod fields {
    pub const REQUEST_ID: &str = "requestId";
    pub const TOKEN_ID: &str = "tokenId";
    pub const OUTPUT: &str = "output";
    pub const FROM: &str = "from";
    pub const TO: &str = "to";
    pub const VALUE: &str = "value";
    pub const KEY_HASH: &str = "keyHash";
    pub const FEE: &str = "fee";
    pub const SENDER: &str = "sender";
}

/// Attribute odds passed to the factory constructor:
/// dark aura, light aura, dark stroke, light stroke, corrupt, noble.
pub const ATTRIBUTE_ODDS: [u64; 6] = [1, 1, 1, 1, 1000, 1000];

pub fn attribute_odds() -> Vec<U256> {
    ATTRIBUTE_ODDS.iter().map(|v| U256::from(*v)).collect()
}
