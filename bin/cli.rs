//! CLI tool for deploying and operating the liquid staking contracts.

use std::str::FromStr;

use liquidstake_contracts::lst::liquid_staking::LiquidStakingInitArgs;
use liquidstake_contracts::lst::stake_token::StakeTokenInitArgs;
use liquidstake_contracts::lst::types::{HostChain, Params};
use liquidstake_contracts::lst::{LiquidStaking, StakeToken};
use odra::casper_types::U256;
use odra::prelude::{Address, Addressable};
use odra::host::HostEnv;
use odra::schema::casper_contract_schema::NamedCLType;
use odra_cli::{
    deploy::DeployScript,
    scenario::{Args, Error, Scenario, ScenarioMetadata},
    CommandArg, ContractProvider, DeployedContractsContainer, DeployerExt,
    OdraCli,
};

/// Collaborator addresses are taken from the environment, e.g.
/// `ICA_CONTROLLER=hash-...`.
fn address_from_env(name: &str) -> Address {
    let value = std::env::var(name).unwrap_or_else(|_| panic!("{name} is not set"));
    Address::from_str(&value).unwrap_or_else(|_| panic!("{name} is not a valid address"))
}

fn string_from_env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| String::from(default))
}

/// Deploys the receipt token.
pub struct StakeTokenDeployScript;

impl DeployScript for StakeTokenDeployScript {
    fn deploy(
        &self,
        env: &HostEnv,
        container: &mut DeployedContractsContainer
    ) -> Result<(), odra_cli::deploy::Error> {
        let _token = StakeToken::load_or_deploy(
            &env,
            StakeTokenInitArgs {
                name: string_from_env("RECEIPT_NAME", "Staked CSPR"),
                symbol: string_from_env("RECEIPT_SYMBOL", "stCSPR"),
                decimals: 9,
            },
            container,
            300_000_000_000
        )?;

        Ok(())
    }
}

/// Deploys the liquid staking contract and hands it the minting rights.
/// Requires the receipt token to be deployed first.
pub struct LiquidStakingDeployScript;

impl DeployScript for LiquidStakingDeployScript {
    fn deploy(
        &self,
        env: &HostEnv,
        container: &mut DeployedContractsContainer
    ) -> Result<(), odra_cli::deploy::Error> {
        let mut token = container.contract_ref::<StakeToken>(env)?;
        let fee_address = std::env::var("FEE_ADDRESS")
            .ok()
            .and_then(|value| Address::from_str(&value).ok())
            .unwrap_or_else(|| env.caller());

        let host_chain = HostChain {
            chain_id: string_from_env("HOST_CHAIN_ID", "cosmoshub-4"),
            connection_id: string_from_env("HOST_CONNECTION_ID", "connection-0"),
            transfer_channel: string_from_env("HOST_TRANSFER_CHANNEL", "channel-0"),
            host_denom: string_from_env("HOST_DENOM", "uatom"),
            epoch_identifier: string_from_env("HOST_EPOCH_IDENTIFIER", "day"),
            delegation_account: string_from_env("HOST_DELEGATION_ACCOUNT", ""),
            rewards_account: string_from_env("HOST_REWARDS_ACCOUNT", ""),
        };
        let params = Params {
            deposit_fee_bps: 0,
            restake_fee_bps: 1_000,
            unstake_fee_bps: 0,
            redeem_fee_bps: 50,
            min_deposit: U256::from(1_000_000_000u64), // 1 CSPR (9 decimals)
            rebalance_threshold_bps: 100,
            max_retries: 3,
            retry_backoff: 600_000,  // 10 minutes
            ack_timeout: 3_600_000,  // 1 hour
            fee_address,
        };

        let staking = LiquidStaking::load_or_deploy(
            &env,
            LiquidStakingInitArgs {
                token: token.address().clone(),
                ica_controller: address_from_env("ICA_CONTROLLER"),
                epoch_source: address_from_env("EPOCH_SOURCE"),
                validator_querier: address_from_env("VALIDATOR_QUERIER"),
                host_chain,
                params,
            },
            container,
            600_000_000_000
        )?;

        env.set_gas(50_000_000_000);
        token.set_minter(staking.address().clone());

        Ok(())
    }
}

/// Deploys the receipt token and the liquid staking contract.
pub struct PoolDeployScript;

impl DeployScript for PoolDeployScript {
    fn deploy(
        &self,
        env: &HostEnv,
        container: &mut DeployedContractsContainer
    ) -> Result<(), odra_cli::deploy::Error> {
        StakeTokenDeployScript.deploy(env, container)?;
        LiquidStakingDeployScript.deploy(env, container)?;

        Ok(())
    }
}

/// Scenario running the per-block lifecycle crank.
pub struct TickScenario;

impl Scenario for TickScenario {
    fn args(&self) -> Vec<CommandArg> {
        vec![]
    }

    fn run(
        &self,
        env: &HostEnv,
        container: &DeployedContractsContainer,
        _args: Args
    ) -> Result<(), Error> {
        let mut staking = container.contract_ref::<LiquidStaking>(env)?;

        env.set_gas(200_000_000_000);
        staking.try_tick()?;

        let state = staking.module_state();
        println!(
            "Open epoch {}, C-value {}, idle {}, in transit {}",
            state.open_epoch, state.c_value, state.idle_deposits, state.in_transit
        );
        Ok(())
    }
}

impl ScenarioMetadata for TickScenario {
    const NAME: &'static str = "tick";
    const DESCRIPTION: &'static str = "Runs the lifecycle crank: delegation, rebalance, epochs and retries";
}

/// Scenario adding a validator to the allow-list.
pub struct AddValidatorScenario;

impl Scenario for AddValidatorScenario {
    fn args(&self) -> Vec<CommandArg> {
        vec![
            CommandArg::new(
                "validator",
                "Operator address of the validator",
                NamedCLType::Key,
            ),
            CommandArg::new(
                "weight",
                "Relative target weight",
                NamedCLType::U32,
            ),
        ]
    }

    fn run(
        &self,
        env: &HostEnv,
        container: &DeployedContractsContainer,
        args: Args
    ) -> Result<(), Error> {
        let mut staking = container.contract_ref::<LiquidStaking>(env)?;
        let validator = args.get_single::<Address>("validator")?;
        let weight = args.get_single::<u32>("weight")?;

        env.set_gas(50_000_000_000);
        staking.try_add_validator(validator, weight)?;

        println!("Validator added to the allow-list");
        Ok(())
    }
}

impl ScenarioMetadata for AddValidatorScenario {
    const NAME: &'static str = "add-validator";
    const DESCRIPTION: &'static str = "Adds a validator to the allow-list with a target weight";
}

/// Scenario giving an exhausted undelegation a fresh retry budget.
pub struct ResubmitUnbondingScenario;

impl Scenario for ResubmitUnbondingScenario {
    fn args(&self) -> Vec<CommandArg> {
        vec![
            CommandArg::new(
                "epoch",
                "Unbonding epoch number",
                NamedCLType::U64,
            ),
            CommandArg::new(
                "validator",
                "Operator address of the validator",
                NamedCLType::Key,
            ),
        ]
    }

    fn run(
        &self,
        env: &HostEnv,
        container: &DeployedContractsContainer,
        args: Args
    ) -> Result<(), Error> {
        let mut staking = container.contract_ref::<LiquidStaking>(env)?;
        let epoch = args.get_single::<u64>("epoch")?;
        let validator = args.get_single::<Address>("validator")?;

        env.set_gas(100_000_000_000);
        let dispatch_id = staking.try_resubmit_exhausted_unbonding(epoch, validator)?;

        println!("Undelegation resubmitted as dispatch {}", dispatch_id);
        Ok(())
    }
}

impl ScenarioMetadata for ResubmitUnbondingScenario {
    const NAME: &'static str = "resubmit-unbonding";
    const DESCRIPTION: &'static str = "Resubmits an undelegation that ran out of retries";
}

/// Scenario comparing recorded delegations with the host chain.
pub struct ReconcileScenario;

impl Scenario for ReconcileScenario {
    fn args(&self) -> Vec<CommandArg> {
        vec![]
    }

    fn run(
        &self,
        env: &HostEnv,
        container: &DeployedContractsContainer,
        _args: Args
    ) -> Result<(), Error> {
        let mut staking = container.contract_ref::<LiquidStaking>(env)?;

        env.set_gas(100_000_000_000);
        let slashed = staking.try_reconcile_validator_set()?;

        println!("Slashed amount applied: {}", slashed);
        Ok(())
    }
}

impl ScenarioMetadata for ReconcileScenario {
    const NAME: &'static str = "reconcile";
    const DESCRIPTION: &'static str = "Applies slashing reported by the host chain";
}

/// Main function to run the CLI tool.
pub fn main() {
    OdraCli::new()
        .about("CLI tool for the liquid staking contracts")
        // Deploy scripts
        .deploy(StakeTokenDeployScript)
        .deploy(LiquidStakingDeployScript)
        .deploy(PoolDeployScript)
        // Contract references
        .contract::<StakeToken>()
        .contract::<LiquidStaking>()
        // Scenarios
        .scenario(TickScenario)
        .scenario(AddValidatorScenario)
        .scenario(ResubmitUnbondingScenario)
        .scenario(ReconcileScenario)
        .build()
        .run();
}
