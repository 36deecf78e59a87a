//! Built-in chain catalogue.
//!
//! RPC URLs are free public endpoints (Cloudflare, Ankr, LlamaRPC and the
//! chains' own gateways); fine for development, rate limited in production.

use alloy_primitives::{address, Address};

use crate::chain::{BlockExplorer, ChainDescriptor, ChainId, MulticallContract, NativeCurrency};

/// Multicall3 is deployed at the same address on every chain below.
pub const MULTICALL3_ADDRESS: Address = address!("cA11bde05977b3631167028862bE2a173976CA11");

pub mod ids {
    use crate::chain::ChainId;

    pub const MAINNET: ChainId = 1;
    pub const GOERLI: ChainId = 5;
    pub const SEPOLIA: ChainId = 11_155_111;
    pub const OPTIMISM: ChainId = 10;
    pub const POLYGON: ChainId = 137;
    pub const ARBITRUM: ChainId = 42_161;
    pub const BASE: ChainId = 8_453;
    pub const LOCALHOST: ChainId = 1_337;
    pub const FOUNDRY: ChainId = 31_337;
}

fn multicall3(block_created: u64) -> Option<MulticallContract> {
    Some(MulticallContract {
        address: MULTICALL3_ADDRESS,
        block_created: Some(block_created),
    })
}

fn explorer(name: &str, url: &str) -> Option<BlockExplorer> {
    Some(BlockExplorer {
        name: name.into(),
        url: url.into(),
    })
}

fn urls(list: &[&str]) -> Vec<String> {
    list.iter().map(|u| (*u).to_string()).collect()
}

pub fn mainnet() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::MAINNET,
        name: "Ethereum".into(),
        network: "homestead".into(),
        native_currency: NativeCurrency::ether(),
        rpc_urls: urls(&["https://cloudflare-eth.com", "https://rpc.ankr.com/eth", "https://eth.llamarpc.com"]),
        ws_urls: vec![],
        multicall: multicall3(14_353_601),
        block_explorer: explorer("Etherscan", "https://etherscan.io"),
        testnet: false,
    }
}

pub fn goerli() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::GOERLI,
        name: "Goerli".into(),
        network: "goerli".into(),
        native_currency: NativeCurrency {
            name: "Goerli Ether".into(),
            symbol: "ETH".into(),
            decimals: 18,
        },
        rpc_urls: urls(&["https://rpc.ankr.com/eth_goerli"]),
        ws_urls: vec![],
        multicall: multicall3(6_507_670),
        block_explorer: explorer("Etherscan", "https://goerli.etherscan.io"),
        testnet: true,
    }
}

pub fn sepolia() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::SEPOLIA,
        name: "Sepolia".into(),
        network: "sepolia".into(),
        native_currency: NativeCurrency {
            name: "Sepolia Ether".into(),
            symbol: "SEP".into(),
            decimals: 18,
        },
        rpc_urls: urls(&["https://rpc.sepolia.org", "https://rpc.ankr.com/eth_sepolia"]),
        ws_urls: vec![],
        multicall: multicall3(751_532),
        block_explorer: explorer("Etherscan", "https://sepolia.etherscan.io"),
        testnet: true,
    }
}

pub fn optimism() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::OPTIMISM,
        name: "Optimism".into(),
        network: "optimism".into(),
        native_currency: NativeCurrency::ether(),
        rpc_urls: urls(&["https://mainnet.optimism.io", "https://rpc.ankr.com/optimism"]),
        ws_urls: vec![],
        multicall: multicall3(4_286_263),
        block_explorer: explorer("Etherscan", "https://optimistic.etherscan.io"),
        testnet: false,
    }
}

pub fn polygon() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::POLYGON,
        name: "Polygon".into(),
        network: "matic".into(),
        native_currency: NativeCurrency {
            name: "MATIC".into(),
            symbol: "MATIC".into(),
            decimals: 18,
        },
        rpc_urls: urls(&["https://polygon-rpc.com", "https://rpc.ankr.com/polygon", "https://polygon.llamarpc.com"]),
        ws_urls: vec![],
        multicall: multicall3(25_770_160),
        block_explorer: explorer("PolygonScan", "https://polygonscan.com"),
        testnet: false,
    }
}

pub fn arbitrum() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::ARBITRUM,
        name: "Arbitrum One".into(),
        network: "arbitrum".into(),
        native_currency: NativeCurrency::ether(),
        rpc_urls: urls(&["https://arb1.arbitrum.io/rpc", "https://rpc.ankr.com/arbitrum"]),
        ws_urls: vec![],
        multicall: multicall3(7_654_707),
        block_explorer: explorer("Arbiscan", "https://arbiscan.io"),
        testnet: false,
    }
}

pub fn base() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::BASE,
        name: "Base".into(),
        network: "base".into(),
        native_currency: NativeCurrency::ether(),
        rpc_urls: urls(&["https://mainnet.base.org", "https://rpc.ankr.com/base"]),
        ws_urls: vec![],
        multicall: multicall3(5_022),
        block_explorer: explorer("Basescan", "https://basescan.org"),
        testnet: false,
    }
}

pub fn localhost() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::LOCALHOST,
        name: "Localhost".into(),
        network: "localhost".into(),
        native_currency: NativeCurrency::ether(),
        rpc_urls: urls(&["http://127.0.0.1:8545"]),
        ws_urls: vec![],
        multicall: None,
        block_explorer: None,
        testnet: false,
    }
}

pub fn foundry() -> ChainDescriptor {
    ChainDescriptor {
        id: ids::FOUNDRY,
        name: "Foundry".into(),
        network: "foundry".into(),
        native_currency: NativeCurrency::ether(),
        rpc_urls: urls(&["http://127.0.0.1:8545"]),
        ws_urls: urls(&["ws://127.0.0.1:8545"]),
        multicall: None,
        block_explorer: None,
        testnet: false,
    }
}

/// Mainnet plus the public testnets.
pub fn default_chains() -> Vec<ChainDescriptor> {
    vec![mainnet(), goerli(), sepolia()]
}

/// Popular L2s.
pub fn default_l2_chains() -> Vec<ChainDescriptor> {
    vec![optimism(), arbitrum(), base(), polygon()]
}

pub fn all_chains() -> Vec<ChainDescriptor> {
    let mut chains = default_chains();
    chains.extend(default_l2_chains());
    chains.push(localhost());
    chains.push(foundry());
    chains
}

pub fn by_id(id: ChainId) -> Option<ChainDescriptor> {
    all_chains().into_iter().find(|c| c.id == id)
}
