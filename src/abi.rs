//! Solidity bindings for the events and calls the watchers rely on.

use alloy::{
    primitives::{Address, FixedBytes, address, fixed_bytes},
    sol,
};

/// ERC-165 interface id of ERC-721.
pub const ERC721_INTERFACE_ID: FixedBytes<4> = fixed_bytes!("0x80ac58cd");

/// ERC-165 interface id of ERC-1155.
pub const ERC1155_INTERFACE_ID: FixedBytes<4> = fixed_bytes!("0xd9b67a26");

/// Canonical Multicall3 deployment, identical on most EVM chains.
pub const MULTICALL3_ADDRESS: Address = address!("0xcA11bde05977b3631167028862bE2a173976CA11");

sol! {
    /// Transfer-shaped event shared by ERC-20 and (with an indexed id) ERC-721.
    #[derive(Debug, PartialEq, Eq)]
    event Transfer(address indexed from, address indexed to, uint256 value);

    #[derive(Debug, PartialEq, Eq)]
    event TransferSingle(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256 id,
        uint256 value
    );

    #[derive(Debug, PartialEq, Eq)]
    event TransferBatch(
        address indexed operator,
        address indexed from,
        address indexed to,
        uint256[] ids,
        uint256[] values
    );

    interface IERC165 {
        function supportsInterface(bytes4 interfaceId) external view returns (bool);
    }

    interface IERC20Metadata {
        function name() external view returns (string);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }

    interface IMulticall3 {
        #[derive(Debug, PartialEq, Eq)]
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        #[derive(Debug, PartialEq, Eq)]
        struct Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Result[] memory returnData);
    }
}
