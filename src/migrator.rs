use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_products_table::Migration),
            Box::new(m20260301_000002_create_cost_layers_table::Migration),
            Box::new(m20260301_000003_create_product_costing_configs_table::Migration),
            Box::new(m20260301_000004_create_consumption_events_table::Migration),
        ]
    }
}

// Migration implementations

mod m20260301_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Products::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(ColumnDef::new(Products::Category).string().null())
                        .col(
                            ColumnDef::new(Products::StandardCost)
                                .decimal()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_category")
                        .table(Products::Table)
                        .col(Products::Category)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Code,
        Name,
        Category,
        StandardCost,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260301_000002_create_cost_layers_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260301_000002_create_cost_layers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CostLayers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CostLayers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CostLayers::ProductId).uuid().not_null())
                        .col(ColumnDef::new(CostLayers::WarehouseId).uuid().not_null())
                        .col(
                            ColumnDef::new(CostLayers::ReceivedDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CostLayers::OriginalQuantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CostLayers::RemainingQuantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CostLayers::UnitCost)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CostLayers::Currency).string().not_null())
                        .col(ColumnDef::new(CostLayers::ReferenceNumber).string().null())
                        .col(ColumnDef::new(CostLayers::ReferenceType).string().null())
                        .col(
                            ColumnDef::new(CostLayers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CostLayers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cost_layers_product_id")
                                .from(CostLayers::Table, CostLayers::ProductId)
                                .to(
                                    super::m20260301_000001_create_products_table::Products::Table,
                                    super::m20260301_000001_create_products_table::Products::Id,
                                ),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cost_layers_product_warehouse")
                        .table(CostLayers::Table)
                        .col(CostLayers::ProductId)
                        .col(CostLayers::WarehouseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cost_layers_received_date")
                        .table(CostLayers::Table)
                        .col(CostLayers::ReceivedDate)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CostLayers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum CostLayers {
        Table,
        Id,
        ProductId,
        WarehouseId,
        ReceivedDate,
        OriginalQuantity,
        RemainingQuantity,
        UnitCost,
        Currency,
        ReferenceNumber,
        ReferenceType,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20260301_000003_create_product_costing_configs_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260301_000003_create_product_costing_configs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductCostingConfigs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductCostingConfigs::ProductId)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductCostingConfigs::Method)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductCostingConfigs::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_costing_configs_product_id")
                                .from(
                                    ProductCostingConfigs::Table,
                                    ProductCostingConfigs::ProductId,
                                )
                                .to(
                                    super::m20260301_000001_create_products_table::Products::Table,
                                    super::m20260301_000001_create_products_table::Products::Id,
                                ),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(
                    Table::drop()
                        .table(ProductCostingConfigs::Table)
                        .to_owned(),
                )
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ProductCostingConfigs {
        Table,
        ProductId,
        Method,
        UpdatedAt,
    }
}

mod m20260301_000004_create_consumption_events_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20260301_000004_create_consumption_events_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ConsumptionEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ConsumptionEvents::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsumptionEvents::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsumptionEvents::WarehouseId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ConsumptionEvents::LayerId).uuid().null())
                        .col(
                            ColumnDef::new(ConsumptionEvents::Method)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsumptionEvents::Quantity)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsumptionEvents::UnitCost)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsumptionEvents::CogsAmount)
                                .decimal()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ConsumptionEvents::ReferenceNumber)
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ConsumptionEvents::OccurredAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_consumption_events_product_warehouse")
                        .table(ConsumptionEvents::Table)
                        .col(ConsumptionEvents::ProductId)
                        .col(ConsumptionEvents::WarehouseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_consumption_events_occurred_at")
                        .table(ConsumptionEvents::Table)
                        .col(ConsumptionEvents::OccurredAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ConsumptionEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum ConsumptionEvents {
        Table,
        Id,
        ProductId,
        WarehouseId,
        LayerId,
        Method,
        Quantity,
        UnitCost,
        CogsAmount,
        ReferenceNumber,
        OccurredAt,
    }
}
